pub mod lru_cache;
