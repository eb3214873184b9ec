//! Explicit, non-singleton service context (spec §9 design note): built
//! once by the binary's `main` (or a test's setup code) and threaded
//! through `IoPool::new`, rather than reached for via a process-wide
//! static. Two server processes — or two tests in the same process —
//! never share one by accident.

use std::sync::Arc;
use std::time::Duration;

use crate::cpu_pool::CpuPool;
use crate::dispatcher::Dispatch;

pub struct ServiceContext {
    pub dispatch: Arc<dyn Dispatch>,
    pub cpu_pool: Arc<CpuPool>,
    pub read_timeout: Duration,
}

impl ServiceContext {
    pub fn new(dispatch: Arc<dyn Dispatch>, cpu_pool: Arc<CpuPool>, read_timeout: Duration) -> ServiceContext {
        ServiceContext {
            dispatch,
            cpu_pool,
            read_timeout,
        }
    }
}
