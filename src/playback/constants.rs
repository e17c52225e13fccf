/// Join attempts per enqueue before the failure is surfaced.
pub const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Base delay (ms) for the exponential backoff between join attempts.
pub const CONNECT_BACKOFF_BASE_MS: u64 = 1_000;

/// Cap (ms) on the join backoff.
pub const CONNECT_BACKOFF_CAP_MS: u64 = 5_000;

/// Time (ms) one join attempt may take to reach `Ready` directly.
pub const READY_TIMEOUT_MS: u64 = 15_000;

/// Sub-wait (ms) for the connection to at least reach `Connecting`.
pub const CONNECTING_WAIT_MS: u64 = 5_000;

/// Ready wait (ms) granted once the connecting sub-wait succeeded.
pub const CONNECTING_READY_TIMEOUT_MS: u64 = 10_000;

/// Ready wait (ms) before handing a source to an already-joined connection.
pub const REPLAY_READY_TIMEOUT_MS: u64 = 5_000;

/// Window (ms) for an unexpected disconnect to re-enter the handshake
/// before the session is torn down.
pub const RECONNECT_WINDOW_MS: u64 = 10_000;

/// Idle time (ms) before the bot leaves an empty voice channel.
pub const EMPTY_CHANNEL_LEAVE_MS: u64 = 60_000;

/// Queue entries shown in one snapshot.
pub const QUEUE_PAGE_SIZE: usize = 10;
