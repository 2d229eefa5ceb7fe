use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastCGIConnectionID(pub u64);

impl fmt::Display for FastCGIConnectionID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out process-unique ids used to tag log lines per connection.
pub struct FastCGIConnectionIDFactory {
    next_connection_id: AtomicU64,
}

impl FastCGIConnectionIDFactory {
    pub fn new() -> Self {
        Self {
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn new_connection_id(&self) -> FastCGIConnectionID {
        FastCGIConnectionID(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }
}
