//! Fixed paths, bounds and route literals
use std::time::Duration;

/// Path to /proc/stat for the aggregate CPU counters
pub const PROC_STAT_PATH: &str = "/proc/stat";

/// Path to /proc/cpuinfo for the CPU model name
pub const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Environment override for the counter source path
pub const PROC_STAT_ENV: &str = "HINFOSVC_PROC_STAT";

/// Environment override for the CPU descriptor path
pub const CPUINFO_ENV: &str = "HINFOSVC_CPUINFO";

/// Upper bound in bytes for the first line of /proc/stat
pub const STAT_LINE_LIMIT: u64 = 256;

/// Number of counter columns on the aggregate "cpu" line
pub const STAT_COLUMNS: usize = 10;

/// Time between the two counter snapshots of one sample
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Label of the /proc/cpuinfo line holding the CPU name
pub const MODEL_NAME_LABEL: &str = "model name";

/// Receive buffer capacity per connection
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Most bytes of unread request discarded before closing a connection
pub const DRAIN_LIMIT: usize = 64 * 1024;

/// How long to wait for the peer to finish sending before closing
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Pending connection queue length handed to listen(2)
pub const LISTEN_BACKLOG: i32 = 1;

/// Gethostname buffer size (HOST_NAME_MAX + NUL, rounded up)
pub const HOSTNAME_BUFFER_SIZE: usize = 256;

/// Request line prefixes for the three routes
pub const ROUTE_CPU_NAME: &[u8] = b"GET /cpu-name ";
pub const ROUTE_HOSTNAME: &[u8] = b"GET /hostname ";
pub const ROUTE_LOAD: &[u8] = b"GET /load ";
