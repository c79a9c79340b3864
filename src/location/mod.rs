//! Seam to the platform's location services.

pub mod replay;

use std::fmt;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::geo::GpsFix;

pub use replay::ReplayProvider;

/// Which location permission to ask the platform for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    FineLocation,
    CoarseLocation,
}

/// Why a position could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    /// The user or platform refused the location permission.
    PermissionDenied,
    /// The provider could not produce a fix.
    Unavailable(String),
}

impl LocationError {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::Unavailable(_) => "location_unavailable",
        }
    }
}

impl fmt::Display for LocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "location permission denied"),
            Self::Unavailable(reason) => write!(f, "location unavailable: {reason}"),
        }
    }
}

impl std::error::Error for LocationError {}

/// Source of position fixes.
///
/// The one-shot read and the continuous subscription are independent and
/// may complete in either order.
pub trait LocationProvider: Send + Sync + 'static {
    /// Ask for `kind`; resolves to `true` when granted.
    fn request_permission(&self, kind: PermissionKind) -> BoxFuture<'_, bool>;

    /// A single current position.
    fn current_fix(&self) -> BoxFuture<'_, Result<GpsFix, LocationError>>;

    /// Continuous stream of fixes. Dropping the stream cancels the subscription.
    fn watch_fix(&self) -> BoxStream<'static, GpsFix>;
}
