//! Package-runner detection.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::models::runtime::{RuntimeInfo, RuntimeKind};
use crate::platform::PlatformOps;

/// Probe every known runtime, in [`RuntimeKind::ALL`] order.
///
/// Never fails. A runtime is unavailable when its executable is missing or
/// the `--version` probe cannot run; a probe that runs but exits non-zero
/// leaves it available without a version string.
pub async fn detect<P>(platform: &P, probe_timeout: Duration) -> Vec<RuntimeInfo>
where
    P: PlatformOps + ?Sized,
{
    let mut runtimes = Vec::with_capacity(RuntimeKind::ALL.len());

    for kind in RuntimeKind::ALL {
        let Some(path) = platform.which(kind.executable_name()) else {
            debug!(runtime = kind.label(), "runtime not found on search path");
            runtimes.push(RuntimeInfo::unavailable(kind));
            continue;
        };

        match platform.probe_version(&path, probe_timeout).await {
            Ok(version) => {
                info!(
                    runtime = kind.label(),
                    path = %path.display(),
                    version = version.as_deref().unwrap_or("unknown"),
                    "runtime detected"
                );
                runtimes.push(RuntimeInfo::available(kind, path, version));
            }
            Err(err) => {
                warn!(
                    runtime = kind.label(),
                    path = %path.display(),
                    error = %err,
                    "runtime found but version probe failed, treating as unavailable"
                );
                runtimes.push(RuntimeInfo::unavailable(kind));
            }
        }
    }

    runtimes
}

/// Pick the entry for `kind` out of a detection snapshot.
#[must_use]
pub fn find(runtimes: &[RuntimeInfo], kind: RuntimeKind) -> Option<&RuntimeInfo> {
    runtimes.iter().find(|info| info.kind == kind)
}
