//! Snapshot-to-frame conversion and the surface seam.
//!
//! The renderer reads nothing but an immutable [`HistorySnapshot`]; it never
//! touches the shared buffer, so a slow surface cannot stall ingestion.

#![allow(missing_docs)]

use serde::Serialize;

use crate::capture::history::HistorySnapshot;
use crate::capture::ingest::IngestCounters;
use crate::capture::record::RecordLayout;
use crate::core::config::RenderConfig;
use crate::core::errors::{LhmError, Result};

/// A jump larger than this between consecutive yaw readings is a wrap-around.
pub const YAW_WRAP_THRESHOLD_DEG: f64 = 350.0;

/// One plotted series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelTrace {
    pub name: String,
    pub unit: String,
    pub xs: Vec<u64>,
    pub ys: Vec<f64>,
    /// Autoscaled bounds; `None` for an empty trace.
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ChannelTrace {
    fn new(name: &str, unit: &str, xs: Vec<u64>, ys: Vec<f64>) -> Self {
        let (min, max) = bounds(&ys);
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            xs,
            ys,
            min,
            max,
        }
    }

    pub fn latest(&self) -> Option<f64> {
        self.ys.last().copied()
    }
}

/// Everything a surface needs to draw one refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlotFrame {
    pub traces: Vec<ChannelTrace>,
    pub sample_count: usize,
    pub latest_timestamp: Option<u64>,
    pub counters: IngestCounters,
}

impl PlotFrame {
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    #[must_use]
    pub fn with_counters(mut self, counters: IngestCounters) -> Self {
        self.counters = counters;
        self
    }
}

/// Builds [`PlotFrame`]s for a fixed set of visible channels.
#[derive(Debug, Clone)]
pub struct Renderer {
    layout: RecordLayout,
    visible: Vec<usize>,
    yaw_index: Option<usize>,
}

impl Renderer {
    /// Every channel visible, no yaw unwrapping.
    pub fn new(layout: RecordLayout) -> Self {
        let visible = (0..layout.channel_count()).collect();
        Self {
            layout,
            visible,
            yaw_index: None,
        }
    }

    pub fn from_config(layout: RecordLayout, config: &RenderConfig) -> Result<Self> {
        let visible = if config.visible_channels.is_empty() {
            (0..layout.channel_count()).collect()
        } else {
            config
                .visible_channels
                .iter()
                .map(|name| {
                    layout.index_of(name).ok_or_else(|| LhmError::InvalidConfig {
                        details: format!("render.visible_channels: unknown channel {name:?}"),
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };
        let yaw_index = if config.unwrap_yaw {
            layout.index_of(&config.yaw_channel)
        } else {
            None
        };
        Ok(Self {
            layout,
            visible,
            yaw_index,
        })
    }

    pub fn visible_channels(&self) -> impl Iterator<Item = &str> {
        self.visible
            .iter()
            .map(|&i| self.layout.channels[i].name.as_str())
    }

    /// Build a frame from `snapshot`. An empty snapshot gives traces with no points.
    pub fn frame(&self, snapshot: &HistorySnapshot) -> PlotFrame {
        let xs = snapshot.timestamps();
        let traces = self
            .visible
            .iter()
            .map(|&index| {
                let spec = &self.layout.channels[index];
                let mut ys = snapshot.channel(index);
                if self.yaw_index == Some(index) {
                    ys = expand_yaw(&ys);
                }
                ChannelTrace::new(&spec.name, &spec.unit, xs.clone(), ys)
            })
            .collect();

        PlotFrame {
            traces,
            sample_count: snapshot.len(),
            latest_timestamp: xs.last().copied(),
            counters: IngestCounters::default(),
        }
    }
}

/// Fold upward 360 degree wrap-arounds out of a yaw series.
///
/// The first reading is taken as-is; every later jump above
/// [`YAW_WRAP_THRESHOLD_DEG`] lowers the running offset by 360.
pub fn expand_yaw(yaw: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(yaw.len());
    let mut offset = 0.0;
    let mut previous: Option<f64> = None;
    for &value in yaw {
        if previous.is_some_and(|p| value - p > YAW_WRAP_THRESHOLD_DEG) {
            offset -= 360.0;
        }
        out.push(value + offset);
        previous = Some(value);
    }
    out
}

fn bounds(ys: &[f64]) -> (Option<f64>, Option<f64>) {
    ys.iter().fold((None, None), |(lo, hi), &y| {
        (
            Some(lo.map_or(y, |l: f64| l.min(y))),
            Some(hi.map_or(y, |h: f64| h.max(y))),
        )
    })
}

/// Drawing backend for live frames.
pub trait PlotSurface: Send {
    fn draw(&mut self, frame: &PlotFrame) -> Result<()>;

    /// Whether the user asked to stop from this surface (a key press, a closed window).
    fn stop_requested(&mut self) -> bool {
        false
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Surface that draws nothing. Keeps the last frame for inspection.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    frames_drawn: u64,
    last: Option<PlotFrame>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn last_frame(&self) -> Option<&PlotFrame> {
        self.last.as_ref()
    }
}

impl PlotSurface for HeadlessSurface {
    fn draw(&mut self, frame: &PlotFrame) -> Result<()> {
        self.frames_drawn += 1;
        self.last = Some(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::history::BoundedHistory;
    use crate::capture::record::Sample;

    fn history(rows: &[(u64, [f64; 7])]) -> HistorySnapshot {
        let mut h = BoundedHistory::new(100);
        for (ts, values) in rows {
            h.append(Sample::new(*ts, values.to_vec()));
        }
        h.snapshot()
    }

    #[test]
    fn empty_snapshot_renders_empty_frame() {
        let renderer = Renderer::new(RecordLayout::default());
        let frame = renderer.frame(&history(&[]));
        assert!(frame.is_empty());
        assert_eq!(frame.traces.len(), 7);
        assert!(frame.traces.iter().all(|t| t.xs.is_empty() && t.min.is_none()));
        assert_eq!(frame.latest_timestamp, None);
    }

    #[test]
    fn traces_follow_snapshot_with_autoscaled_bounds() {
        let renderer = Renderer::new(RecordLayout::default());
        let frame = renderer.frame(&history(&[
            (10, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            (11, [-2.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            (12, [4.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ]));
        let pv0 = &frame.traces[0];
        assert_eq!(pv0.name, "pv0");
        assert_eq!(pv0.unit, "mV");
        assert_eq!(pv0.xs, vec![10, 11, 12]);
        assert_eq!(pv0.ys, vec![1.0, -2.5, 4.0]);
        assert_eq!(pv0.min, Some(-2.5));
        assert_eq!(pv0.max, Some(4.0));
        assert_eq!(pv0.latest(), Some(4.0));
        assert_eq!(frame.latest_timestamp, Some(12));
    }

    #[test]
    fn visible_channels_select_and_order_traces() {
        let config = RenderConfig {
            visible_channels: vec!["yaw".to_string(), "pv1".to_string()],
            ..RenderConfig::default()
        };
        let renderer = Renderer::from_config(RecordLayout::default(), &config).unwrap();
        assert_eq!(renderer.visible_channels().collect::<Vec<_>>(), ["yaw", "pv1"]);
        let frame = renderer.frame(&history(&[(1, [0.0, 5.0, 0.0, 0.0, 0.0, 0.0, 90.0])]));
        assert_eq!(frame.traces[0].ys, vec![90.0]);
        assert_eq!(frame.traces[1].ys, vec![5.0]);
    }

    #[test]
    fn unknown_visible_channel_is_rejected() {
        let config = RenderConfig {
            visible_channels: vec!["heading".to_string()],
            ..RenderConfig::default()
        };
        let err = Renderer::from_config(RecordLayout::default(), &config).unwrap_err();
        assert_eq!(err.code(), "LHM-1001");
    }

    #[test]
    fn expand_yaw_folds_upward_wraps() {
        assert_eq!(expand_yaw(&[5.0, 2.0, 358.0, 355.0]), vec![5.0, 2.0, -2.0, -5.0]);
        assert_eq!(
            expand_yaw(&[1.0, 359.0, 2.0, 358.0]),
            vec![1.0, -1.0, 2.0, -2.0]
        );
    }

    #[test]
    fn expand_yaw_keeps_first_reading() {
        assert_eq!(expand_yaw(&[355.0, 356.0]), vec![355.0, 356.0]);
        assert!(expand_yaw(&[]).is_empty());
    }

    #[test]
    fn yaw_unwrap_applies_only_to_yaw_channel() {
        let renderer =
            Renderer::from_config(RecordLayout::default(), &RenderConfig::default()).unwrap();
        let frame = renderer.frame(&history(&[
            (1, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 3.0]),
            (2, [0.0, 0.0, 0.0, 0.0, 0.0, 359.0, 357.0]),
        ]));
        assert_eq!(frame.traces[5].ys, vec![0.0, 359.0]);
        assert_eq!(frame.traces[6].ys, vec![3.0, -3.0]);
    }

    #[test]
    fn headless_surface_keeps_last_frame() {
        let mut surface = HeadlessSurface::new();
        let frame = PlotFrame::default();
        surface.draw(&frame).unwrap();
        surface.draw(&frame).unwrap();
        assert_eq!(surface.frames_drawn(), 2);
        assert!(surface.last_frame().is_some());
        assert!(!surface.stop_requested());
        surface.close().unwrap();
    }
}
