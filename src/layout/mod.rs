//! Coordinate and monitor-layout transforms
//!
//! The remote client declares a monitor topology in its own pixel space,
//! each monitor with an origin and a scale factor. The compositor works in
//! a single logical output space. This module validates proposed topologies
//! and converts rectangles between the two spaces.
//!
//! Published layouts are immutable and versioned: a transform started
//! against version N completes against version N (callers hold the `Arc`),
//! and `ActiveLayout::publish` swaps versions atomically with respect to
//! in-flight transforms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// Scale factors the client may declare, in percent.
///
/// Matches the desktop scaling range RDP clients negotiate (100%–500%).
pub const SCALE_MIN_PERCENT: u32 = 100;
/// Upper bound of the accepted scale range.
pub const SCALE_MAX_PERCENT: u32 = 500;

/// An axis-aligned rectangle. Position is signed (monitors may sit left of
/// or above the primary), size is unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in the rect's coordinate space
    pub width: u32,
    /// Height in the rect's coordinate space
    pub height: u32,
}

impl Rect {
    /// Construct a rect from its components.
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    /// Area of the intersection with `other`, zero when disjoint.
    pub fn overlap_area(&self, other: &Rect) -> u64 {
        let w = self.right().min(other.right()) - i64::from(self.x.max(other.x));
        let h = self.bottom().min(other.bottom()) - i64::from(self.y.max(other.y));
        if w <= 0 || h <= 0 {
            0
        } else {
            (w as u64) * (h as u64)
        }
    }

    /// Whether the two rects share any area.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.overlap_area(other) > 0
    }
}

/// One monitor as declared by the remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorDescriptor {
    /// Origin in client space
    pub x: i32,
    /// Origin in client space
    pub y: i32,
    /// Pixel width in client space
    pub width: u32,
    /// Pixel height in client space
    pub height: u32,
    /// Desktop scale factor, percent (100–500)
    pub scale_percent: u32,
    /// Whether the client marks this monitor primary
    pub is_primary: bool,
    /// Usable work area in client space (taskbar excluded). Defaults to the
    /// full monitor rect when the client doesn't report one.
    #[serde(default)]
    pub workarea: Option<Rect>,
}

/// Identifies one logical output within a published layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputId(pub u32);

/// One monitor after validation: its client rect, its compositor-space
/// rect, and its work areas in both spaces.
#[derive(Debug, Clone)]
pub struct Monitor {
    /// Output handle for this monitor
    pub output: OutputId,
    /// Monitor rect in client space
    pub client_rect: Rect,
    /// Monitor rect in compositor logical space
    pub compositor_rect: Rect,
    /// Scale factor, percent
    pub scale_percent: u32,
    /// Work area in client space
    pub workarea_client: Rect,
    /// Work area in compositor logical space
    pub workarea: Rect,
    /// Primary flag as declared by the client
    pub is_primary: bool,
}

/// An immutable, versioned monitor layout.
#[derive(Debug)]
pub struct MonitorLayout {
    version: u64,
    monitors: Vec<Monitor>,
    primary: OutputId,
}

impl MonitorLayout {
    /// Validate a proposed topology and compute compositor-side geometry.
    ///
    /// Rejects empty topologies, zero-sized monitors, scale factors outside
    /// [`SCALE_MIN_PERCENT`]..=[`SCALE_MAX_PERCENT`], and monitors that
    /// overlap in client space (the single logical output cannot represent
    /// them). The compositor space is normalized so its top-left is (0, 0).
    pub fn validate(version: u64, monitors: &[MonitorDescriptor]) -> Result<Self> {
        if monitors.is_empty() {
            return Err(BridgeError::Layout("no monitors declared".into()));
        }

        for (i, m) in monitors.iter().enumerate() {
            if m.width == 0 || m.height == 0 {
                return Err(BridgeError::Layout(format!(
                    "monitor {i} has non-positive size {}x{}",
                    m.width, m.height
                )));
            }
            if !(SCALE_MIN_PERCENT..=SCALE_MAX_PERCENT).contains(&m.scale_percent) {
                return Err(BridgeError::Layout(format!(
                    "monitor {i} scale {}% outside {SCALE_MIN_PERCENT}-{SCALE_MAX_PERCENT}%",
                    m.scale_percent
                )));
            }
        }

        for i in 0..monitors.len() {
            for j in (i + 1)..monitors.len() {
                let a = Rect::new(monitors[i].x, monitors[i].y, monitors[i].width, monitors[i].height);
                let b = Rect::new(monitors[j].x, monitors[j].y, monitors[j].width, monitors[j].height);
                if a.intersects(&b) {
                    return Err(BridgeError::Layout(format!(
                        "monitors {i} and {j} overlap in client space"
                    )));
                }
            }
        }

        // Normalize so compositor space starts at (0, 0): offsets are taken
        // relative to the desktop's top-left corner in client space.
        let left = desktop_left(monitors);
        let top = desktop_top(monitors);

        let mut built = Vec::with_capacity(monitors.len());
        for (i, m) in monitors.iter().enumerate() {
            let client_rect = Rect::new(m.x, m.y, m.width, m.height);
            let compositor_rect = Rect::new(
                scale_down(m.x - left, m.scale_percent),
                scale_down(m.y - top, m.scale_percent),
                scale_down_len(m.width, m.scale_percent),
                scale_down_len(m.height, m.scale_percent),
            );
            let workarea_client = m.workarea.unwrap_or(client_rect);
            let monitor = Monitor {
                output: OutputId(i as u32),
                client_rect,
                compositor_rect,
                scale_percent: m.scale_percent,
                workarea_client,
                workarea: Rect::new(
                    compositor_rect.x
                        + scale_down(workarea_client.x - client_rect.x, m.scale_percent),
                    compositor_rect.y
                        + scale_down(workarea_client.y - client_rect.y, m.scale_percent),
                    scale_down_len(workarea_client.width, m.scale_percent),
                    scale_down_len(workarea_client.height, m.scale_percent),
                ),
                is_primary: m.is_primary,
            };
            built.push(monitor);
        }

        // Mixed scale factors can fold disjoint client rects onto the same
        // logical area; the single logical output cannot represent that.
        for i in 0..built.len() {
            for j in (i + 1)..built.len() {
                if built[i].compositor_rect.intersects(&built[j].compositor_rect) {
                    return Err(BridgeError::Layout(format!(
                        "monitors {i} and {j} overlap in compositor space after scaling"
                    )));
                }
            }
        }

        let primary = built
            .iter()
            .find(|m| m.is_primary)
            .or_else(|| built.first())
            .map(|m| m.output)
            .unwrap_or(OutputId(0));

        debug!(version, monitors = built.len(), "monitor layout validated");
        Ok(Self {
            version,
            monitors: built,
            primary,
        })
    }

    /// Layout version this instance was published as.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The validated monitors.
    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    /// Output the client marked primary (or the first monitor).
    pub fn primary_output(&self) -> OutputId {
        self.primary
    }

    /// Whether `output` exists in this layout.
    pub fn output_exists(&self, output: OutputId) -> bool {
        (output.0 as usize) < self.monitors.len()
    }

    /// Work area of `output` in compositor space.
    pub fn workarea(&self, output: OutputId) -> Option<Rect> {
        self.monitors.get(output.0 as usize).map(|m| m.workarea)
    }

    /// Convert a client-space rect to compositor logical space.
    ///
    /// A rect spanning monitors with differing scales is resolved against
    /// the monitor with the greatest area of overlap; the ambiguity is
    /// logged non-fatally. A rect off every monitor resolves against the
    /// primary.
    pub fn to_local(&self, client_rect: Rect) -> Rect {
        let monitor = self.reference_monitor(client_rect, |m| m.client_rect);
        Rect::new(
            monitor.compositor_rect.x
                + scale_down(client_rect.x - monitor.client_rect.x, monitor.scale_percent),
            monitor.compositor_rect.y
                + scale_down(client_rect.y - monitor.client_rect.y, monitor.scale_percent),
            scale_down_len(client_rect.width, monitor.scale_percent),
            scale_down_len(client_rect.height, monitor.scale_percent),
        )
    }

    /// Convert a compositor-space rect to client space. Exact left-inverse
    /// of [`to_local`](Self::to_local) for single-monitor layouts at 100%.
    pub fn to_remote(&self, compositor_rect: Rect) -> Rect {
        let monitor = self.reference_monitor(compositor_rect, |m| m.compositor_rect);
        Rect::new(
            monitor.client_rect.x
                + scale_up(compositor_rect.x - monitor.compositor_rect.x, monitor.scale_percent),
            monitor.client_rect.y
                + scale_up(compositor_rect.y - monitor.compositor_rect.y, monitor.scale_percent),
            scale_up_len(compositor_rect.width, monitor.scale_percent),
            scale_up_len(compositor_rect.height, monitor.scale_percent),
        )
    }

    fn reference_monitor(&self, rect: Rect, space: impl Fn(&Monitor) -> Rect) -> &Monitor {
        let mut best: Option<(&Monitor, u64)> = None;
        let mut scales_differ = false;
        for monitor in &self.monitors {
            let area = space(monitor).overlap_area(&rect);
            if area == 0 {
                continue;
            }
            match best {
                Some((chosen, best_area)) => {
                    if chosen.scale_percent != monitor.scale_percent {
                        scales_differ = true;
                    }
                    if area > best_area {
                        best = Some((monitor, area));
                    }
                }
                None => best = Some((monitor, area)),
            }
        }
        if scales_differ {
            warn!(
                ?rect,
                "rect spans monitors with differing scales; using greatest overlap"
            );
        }
        match best {
            Some((monitor, _)) => monitor,
            None => {
                warn!(?rect, "rect outside all monitors; using primary");
                &self.monitors[self.primary.0 as usize]
            }
        }
    }
}

fn desktop_left(monitors: &[MonitorDescriptor]) -> i32 {
    monitors.iter().map(|m| m.x).min().unwrap_or(0)
}

fn desktop_top(monitors: &[MonitorDescriptor]) -> i32 {
    monitors.iter().map(|m| m.y).min().unwrap_or(0)
}

fn scale_down(v: i32, scale_percent: u32) -> i32 {
    ((i64::from(v) * 100) / i64::from(scale_percent)) as i32
}

fn scale_down_len(v: u32, scale_percent: u32) -> u32 {
    ((u64::from(v) * 100) / u64::from(scale_percent)) as u32
}

fn scale_up(v: i32, scale_percent: u32) -> i32 {
    ((i64::from(v) * i64::from(scale_percent)) / 100) as i32
}

fn scale_up_len(v: u32, scale_percent: u32) -> u32 {
    ((u64::from(v) * u64::from(scale_percent)) / 100) as u32
}

/// Holder for the currently active layout.
///
/// Publishing replaces the `Arc` under a write lock; readers clone the
/// `Arc` and keep transforming against the version they started with.
#[derive(Debug)]
pub struct ActiveLayout {
    current: RwLock<Option<Arc<MonitorLayout>>>,
    next_version: AtomicU64,
}

impl ActiveLayout {
    /// Create with no layout published yet (client still negotiating).
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            next_version: AtomicU64::new(1),
        }
    }

    /// Validate `monitors` and atomically publish the result. On rejection
    /// the prior layout remains active.
    pub fn publish(&self, monitors: &[MonitorDescriptor]) -> Result<Arc<MonitorLayout>> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let layout = Arc::new(MonitorLayout::validate(version, monitors)?);
        *self.current.write() = Some(Arc::clone(&layout));
        debug!(version, "monitor layout published");
        Ok(layout)
    }

    /// The active layout, if any has been published.
    pub fn current(&self) -> Option<Arc<MonitorLayout>> {
        self.current.read().clone()
    }
}

impl Default for ActiveLayout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(width: u32, height: u32, scale: u32) -> Vec<MonitorDescriptor> {
        vec![MonitorDescriptor {
            x: 0,
            y: 0,
            width,
            height,
            scale_percent: scale,
            is_primary: true,
            workarea: None,
        }]
    }

    #[test]
    fn test_round_trip_identity_at_scale_100() {
        let layout = MonitorLayout::validate(1, &single(1920, 1080, 100)).unwrap();
        for rect in [
            Rect::new(0, 0, 800, 600),
            Rect::new(13, 27, 1, 1),
            Rect::new(1000, 500, 920, 580),
        ] {
            assert_eq!(layout.to_remote(layout.to_local(rect)), rect);
        }
    }

    #[test]
    fn test_scale_200_halves_local_coordinates() {
        let layout = MonitorLayout::validate(1, &single(3840, 2160, 200)).unwrap();
        let local = layout.to_local(Rect::new(400, 200, 800, 600));
        assert_eq!(local, Rect::new(200, 100, 400, 300));
        assert_eq!(layout.to_remote(local), Rect::new(400, 200, 800, 600));
    }

    #[test]
    fn test_rejects_zero_sized_monitor() {
        let err = MonitorLayout::validate(1, &single(0, 1080, 100)).unwrap_err();
        assert!(matches!(err, BridgeError::Layout(_)));
    }

    #[test]
    fn test_rejects_scale_out_of_bounds() {
        for scale in [99, 501] {
            let err = MonitorLayout::validate(1, &single(1920, 1080, scale)).unwrap_err();
            assert!(matches!(err, BridgeError::Layout(_)));
        }
    }

    #[test]
    fn test_rejects_overlapping_monitors() {
        let monitors = vec![
            MonitorDescriptor {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
                scale_percent: 100,
                is_primary: true,
                workarea: None,
            },
            MonitorDescriptor {
                x: 1900,
                y: 0,
                width: 1920,
                height: 1080,
                scale_percent: 100,
                is_primary: false,
                workarea: None,
            },
        ];
        let err = MonitorLayout::validate(1, &monitors).unwrap_err();
        assert!(matches!(err, BridgeError::Layout(_)));
    }

    #[test]
    fn test_secondary_monitor_left_of_primary() {
        let monitors = vec![
            MonitorDescriptor {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
                scale_percent: 100,
                is_primary: true,
                workarea: None,
            },
            MonitorDescriptor {
                x: -1280,
                y: 0,
                width: 1280,
                height: 1024,
                scale_percent: 100,
                is_primary: false,
                workarea: None,
            },
        ];
        let layout = MonitorLayout::validate(1, &monitors).unwrap();
        // Compositor space is normalized to start at (0, 0).
        let local = layout.to_local(Rect::new(-1280, 0, 100, 100));
        assert_eq!(local, Rect::new(0, 0, 100, 100));
        let local_primary = layout.to_local(Rect::new(0, 0, 100, 100));
        assert_eq!(local_primary, Rect::new(1280, 0, 100, 100));
    }

    #[test]
    fn test_spanning_rect_uses_greatest_overlap() {
        let monitors = vec![
            MonitorDescriptor {
                x: 0,
                y: 0,
                width: 2000,
                height: 1000,
                scale_percent: 200,
                is_primary: true,
                workarea: None,
            },
            MonitorDescriptor {
                x: 2000,
                y: 0,
                width: 1000,
                height: 1000,
                scale_percent: 100,
                is_primary: false,
                workarea: None,
            },
        ];
        let layout = MonitorLayout::validate(1, &monitors).unwrap();
        // 500px of the rect sits on the first monitor, 300px on the second:
        // the first monitor's 200% scale applies.
        let local = layout.to_local(Rect::new(1500, 0, 800, 100));
        assert_eq!(local, Rect::new(750, 0, 400, 50));
    }

    #[test]
    fn test_rejects_layout_folding_onto_same_logical_area() {
        // Disjoint in client space, but the 200% monitor scales down onto
        // the logical area the first monitor occupies.
        let monitors = vec![
            MonitorDescriptor {
                x: 0,
                y: 0,
                width: 1000,
                height: 1000,
                scale_percent: 100,
                is_primary: true,
                workarea: None,
            },
            MonitorDescriptor {
                x: 1000,
                y: 0,
                width: 1000,
                height: 1000,
                scale_percent: 200,
                is_primary: false,
                workarea: None,
            },
        ];
        let err = MonitorLayout::validate(1, &monitors).unwrap_err();
        assert!(matches!(err, BridgeError::Layout(_)));
    }

    #[test]
    fn test_publish_keeps_prior_layout_on_rejection() {
        let active = ActiveLayout::new();
        let first = active.publish(&single(1920, 1080, 100)).unwrap();
        assert!(active.publish(&single(0, 0, 100)).is_err());
        let current = active.current().unwrap();
        assert_eq!(current.version(), first.version());
    }

    #[test]
    fn test_versions_increase_monotonically() {
        let active = ActiveLayout::new();
        let a = active.publish(&single(1920, 1080, 100)).unwrap();
        let b = active.publish(&single(1280, 720, 100)).unwrap();
        assert!(b.version() > a.version());
    }

    #[test]
    fn test_workarea_scaled_to_compositor_space() {
        let monitors = vec![MonitorDescriptor {
            x: 0,
            y: 0,
            width: 2000,
            height: 2000,
            scale_percent: 200,
            is_primary: true,
            workarea: Some(Rect::new(0, 80, 2000, 1920)),
        }];
        let layout = MonitorLayout::validate(1, &monitors).unwrap();
        assert_eq!(
            layout.workarea(OutputId(0)),
            Some(Rect::new(0, 40, 1000, 960))
        );
    }
}
