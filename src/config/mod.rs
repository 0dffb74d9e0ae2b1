#[derive(Debug, Clone, Copy)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        BufferPoolConfig { pool_size: 128 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WalConfig {
    /// When set, every WAL flush reaches durable media (fdatasync) before
    /// returning. Disabling trades crash safety for test speed.
    pub sync_on_flush: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            sync_on_flush: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineConfig {
    pub buffer_pool: BufferPoolConfig,
    pub wal: WalConfig,
}
