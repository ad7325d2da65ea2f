//! Read-only orbit-data queries.
//!
//! Orbital agents cannot steer towards a target; they can only measure a
//! ground point while their orbit passes over it.  Arrival-time computation
//! therefore asks a precomputed access-window provider rather than doing any
//! propagation of its own.  Real deployments back this with an external
//! astrodynamics toolchain; scenarios and tests use [`GroundTrackTable`].

/// One interval during which a ground point is observable.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AccessWindow {
    pub t_enter: f64,
    pub t_exit: f64,
}

/// Read-only query object for ground-point visibility.
pub trait OrbitDataProvider: Send + Sync {
    /// Access windows for the point `(lat, lon)` whose exit lies at or after
    /// `t_from`, in ascending `t_enter` order.
    fn access_windows(&self, lat: f64, lon: f64, t_from: f64) -> Vec<AccessWindow>;
}

/// Table-backed provider: a list of ground points with their precomputed
/// windows, matched within a spatial tolerance.
pub struct GroundTrackTable {
    entries: Vec<(f64, f64, Vec<AccessWindow>)>,
    tolerance: f64,
}

impl GroundTrackTable {
    pub fn new(tolerance: f64) -> Self {
        Self { entries: Vec::new(), tolerance }
    }

    /// Register the windows of one ground point.
    pub fn with_point(mut self, lat: f64, lon: f64, windows: Vec<AccessWindow>) -> Self {
        self.entries.push((lat, lon, windows));
        self
    }
}

impl OrbitDataProvider for GroundTrackTable {
    fn access_windows(&self, lat: f64, lon: f64, t_from: f64) -> Vec<AccessWindow> {
        let mut windows: Vec<AccessWindow> = self
            .entries
            .iter()
            .filter(|(p_lat, p_lon, _)| {
                (p_lat - lat).abs() <= self.tolerance && (p_lon - lon).abs() <= self.tolerance
            })
            .flat_map(|(_, _, ws)| ws.iter().copied())
            .filter(|w| w.t_exit >= t_from)
            .collect();
        windows.sort_by(|a, b| a.t_enter.total_cmp(&b.t_enter));
        windows
    }
}
