//! Location provider that replays a recorded track.
//!
//! A track file holds one fix per line, either as plain `lat,lon` or as the
//! raw `AT+QGPSLOC=2` response captured from a Quectel GNSS modem:
//!
//! ```text
//! # morning run
//! 45.50200,-73.56700
//! +QGPSLOC: 153233.0,45.50210,-73.56710,1.2,47.0,3,270.5,0.0,0.0,260226,08
//! +CME ERROR: 516
//! ```
//!
//! Modem lines reporting "no fix yet" (CME ERROR 516) are skipped. Blank
//! lines and `#` comments are ignored.

use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tracing::{debug, info};

use super::{LocationError, LocationProvider, PermissionKind};
use crate::geo::GpsFix;

/// Replays a fixed list of fixes.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    fixes: Vec<GpsFix>,
    interval: Duration,
    grant_permission: bool,
}

impl ReplayProvider {
    pub fn new(fixes: Vec<GpsFix>, interval: Duration) -> Self {
        Self {
            fixes,
            interval,
            grant_permission: true,
        }
    }

    /// Answer permission requests with `granted`.
    #[must_use]
    pub fn with_permission(mut self, granted: bool) -> Self {
        self.grant_permission = granted;
        self
    }

    /// Load a track file.
    pub async fn from_file(path: &Path, interval: Duration) -> Result<Self, String> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("read track {}: {e}", path.display()))?;
        let fixes = parse_track(&content)?;
        info!("Replay: loaded {} fixes from {}", fixes.len(), path.display());
        Ok(Self::new(fixes, interval))
    }

    pub fn fixes(&self) -> &[GpsFix] {
        &self.fixes
    }
}

impl LocationProvider for ReplayProvider {
    fn request_permission(&self, kind: PermissionKind) -> BoxFuture<'_, bool> {
        let granted = self.grant_permission;
        async move {
            debug!("Replay: permission {kind:?} -> {granted}");
            granted
        }
        .boxed()
    }

    fn current_fix(&self) -> BoxFuture<'_, Result<GpsFix, LocationError>> {
        let first = self.fixes.first().copied();
        async move { first.ok_or_else(|| LocationError::Unavailable("track is empty".into())) }
            .boxed()
    }

    fn watch_fix(&self) -> BoxStream<'static, GpsFix> {
        let interval = self.interval;
        stream::iter(self.fixes.clone())
            .then(move |fix| async move {
                tokio::time::sleep(interval).await;
                fix
            })
            .boxed()
    }
}

/// Parse a whole track file.
pub fn parse_track(content: &str) -> Result<Vec<GpsFix>, String> {
    let mut fixes = Vec::new();
    for (n, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = if line.contains("+QGPSLOC:") || line.contains("ERROR") {
            parse_qgpsloc(line)
        } else {
            parse_lat_lon(line)
        };
        match parsed {
            Ok(fix) if fix.is_valid() => fixes.push(fix),
            Ok(fix) => return Err(format!("line {}: fix out of range: {fix}", n + 1)),
            Err(ref e) if e == "searching" => {}
            Err(e) => return Err(format!("line {}: {e}", n + 1)),
        }
    }
    Ok(fixes)
}

fn parse_lat_lon(line: &str) -> Result<GpsFix, String> {
    let (lat, lon) = line
        .split_once(',')
        .ok_or_else(|| format!("expected \"lat,lon\", got {line:?}"))?;
    Ok(GpsFix::new(
        lat.trim().parse().map_err(|e| format!("bad lat: {e}"))?,
        lon.trim().parse().map_err(|e| format!("bad lon: {e}"))?,
    ))
}

/// Parse an `AT+QGPSLOC=2` response (decimal degrees format).
///
/// ```text
/// +QGPSLOC: <UTC>,<lat>,<lon>,<hdop>,<alt>,<fix>,<cog>,<spkm>,<spkn>,<date>,<nsat>
/// ```
///
/// Returns `Err("searching")` for CME ERROR 516 (no fix yet).
fn parse_qgpsloc(response: &str) -> Result<GpsFix, String> {
    let Some(line) = response.lines().find(|l| l.contains("+QGPSLOC:")) else {
        if response.contains("516") && response.contains("ERROR") {
            return Err("searching".into());
        }
        return Err(format!("modem error: {}", response.trim()));
    };

    let data = line
        .split_once(':')
        .map(|(_, rest)| rest.trim())
        .ok_or("malformed +QGPSLOC line")?;

    let parts: Vec<&str> = data.split(',').collect();
    if parts.len() < 11 {
        return Err(format!(
            "expected 11 fields in QGPSLOC, got {}: {data}",
            parts.len()
        ));
    }

    Ok(GpsFix::new(
        parts[1].parse().map_err(|e| format!("bad lat: {e}"))?,
        parts[2].parse().map_err(|e| format!("bad lon: {e}"))?,
    ))
}
