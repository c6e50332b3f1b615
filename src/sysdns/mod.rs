//! Platform DNS client seam
//!
//! On start the supervisor repoints the operating system's DNS client at
//! this process and adopts whatever resolvers it replaced; on stop it
//! restores the previous settings. The actual re-pointing is platform
//! specific and lives behind this trait; the core only depends on the
//! two calls and tolerates either of them failing.

use tracing::debug;

/// Operations the core invokes on the platform DNS utility
pub trait SystemDns: Send + Sync {
    /// Repoint the OS DNS client at `127.0.0.1`
    ///
    /// Returns the resolvers that were replaced so they can serve as
    /// `private_dns` defaults. Implementations must contain their own
    /// failures: log and return an empty list rather than erroring.
    fn setup(&self) -> Vec<String>;

    /// Restore the original DNS client settings
    ///
    /// Implementations must contain their own failures; serving has
    /// already stopped when this runs.
    fn teardown(&self);
}

/// Implementation that leaves the system untouched
///
/// Used on platforms without a re-pointing utility and whenever the
/// operator manages DNS settings out of band.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSystemDns;

impl SystemDns for NoopSystemDns {
    fn setup(&self) -> Vec<String> {
        debug!("system DNS left unmanaged");
        Vec::new()
    }

    fn teardown(&self) {}
}
