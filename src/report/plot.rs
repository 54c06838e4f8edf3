//! RD figure assembly and rendering
//!
//! A figure is data first: one trace per reference codec and one
//! highlighted marker for the current model, plus a layout. Rendering to
//! SVG is a separate step so Figure-capable logger sinks can decide where
//! the bytes go.

use plotters::prelude::*;

use super::{RdPoint, RdSeries};
use crate::error::{Error, Result};

/// Axis specification: range plus tick spacing
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSpec {
    /// Axis label
    pub title: String,

    /// Inclusive value range
    pub range: (f64, f64),

    /// Tick spacing
    pub dtick: f64,
}

/// Figure layout
#[derive(Debug, Clone, PartialEq)]
pub struct RdPlotLayout {
    /// Bitrate axis
    pub xaxis: AxisSpec,

    /// Quality axis
    pub yaxis: AxisSpec,
}

impl Default for RdPlotLayout {
    fn default() -> Self {
        Self {
            xaxis: AxisSpec {
                title: "Bit-rate [bpp]".to_string(),
                range: (0.0, 2.25),
                dtick: 0.25,
            },
            yaxis: AxisSpec {
                title: "PSNR [dB]".to_string(),
                range: (26.0, 41.0),
                dtick: 1.0,
            },
        }
    }
}

/// Caller-supplied layout overrides; set fields win over defaults
#[derive(Debug, Clone, Default)]
pub struct LayoutOverrides {
    /// Override for the bitrate axis
    pub xaxis: Option<AxisSpec>,

    /// Override for the quality axis
    pub yaxis: Option<AxisSpec>,
}

impl RdPlotLayout {
    /// Apply caller overrides on top of this layout
    pub fn merged(mut self, overrides: &LayoutOverrides) -> Self {
        if let Some(xaxis) = &overrides.xaxis {
            self.xaxis = xaxis.clone();
        }
        if let Some(yaxis) = &overrides.yaxis {
            self.yaxis = yaxis.clone();
        }
        self
    }
}

/// One plotted curve or marker
#[derive(Debug, Clone)]
pub struct RdTrace {
    /// Trace name shown in the legend
    pub name: String,

    /// Bitrates
    pub x: Vec<f64>,

    /// Quality values
    pub y: Vec<f64>,

    /// Whether this trace is the highlighted current model
    pub highlight: bool,
}

/// A renderable RD comparison figure
#[derive(Debug, Clone)]
pub struct RdFigure {
    /// Traces in draw order; reference codecs first, current model last
    pub traces: Vec<RdTrace>,

    /// Merged layout
    pub layout: RdPlotLayout,
}

/// Assemble the RD figure: one line/marker trace per reference codec and
/// one highlighted marker for the current model. Caller layout options
/// take precedence over the defaults.
pub fn plot_rd(
    reference_series: &[RdSeries],
    current: &RdPoint,
    overrides: &LayoutOverrides,
) -> RdFigure {
    let mut traces: Vec<RdTrace> = reference_series
        .iter()
        .map(|series| RdTrace {
            name: series.name.clone(),
            x: series.x.clone(),
            y: series.y.clone(),
            highlight: false,
        })
        .collect();

    traces.push(RdTrace {
        name: current.marked_name(),
        x: vec![current.bpp],
        y: vec![current.psnr],
        highlight: true,
    });

    RdFigure {
        traces,
        layout: RdPlotLayout::default().merged(overrides),
    }
}

impl RdFigure {
    /// Render the figure to an SVG string
    pub fn render_svg(&self, width: u32, height: u32) -> Result<String> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, (width, height)).into_drawing_area();
            root.fill(&WHITE).map_err(draw_err)?;

            let (x_min, x_max) = self.layout.xaxis.range;
            let (y_min, y_max) = self.layout.yaxis.range;
            let x_labels = ((x_max - x_min) / self.layout.xaxis.dtick).round() as usize + 1;
            let y_labels = ((y_max - y_min) / self.layout.yaxis.dtick).round() as usize + 1;

            let mut chart = ChartBuilder::on(&root)
                .margin(12)
                .x_label_area_size(42)
                .y_label_area_size(52)
                .build_cartesian_2d(x_min..x_max, y_min..y_max)
                .map_err(draw_err)?;

            chart
                .configure_mesh()
                .x_desc(self.layout.xaxis.title.clone())
                .y_desc(self.layout.yaxis.title.clone())
                .x_labels(x_labels)
                .y_labels(y_labels)
                .draw()
                .map_err(draw_err)?;

            for (idx, trace) in self.traces.iter().enumerate() {
                let color = Palette99::pick(idx).to_rgba();
                let points: Vec<(f64, f64)> = trace
                    .x
                    .iter()
                    .zip(trace.y.iter())
                    .map(|(&x, &y)| (x, y))
                    .collect();

                if trace.highlight {
                    chart
                        .draw_series(
                            points
                                .iter()
                                .map(|&(x, y)| Circle::new((x, y), 6, color.filled())),
                        )
                        .map_err(draw_err)?
                        .label(trace.name.clone())
                        .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
                } else {
                    chart
                        .draw_series(LineSeries::new(points.iter().copied(), &color))
                        .map_err(draw_err)?
                        .label(trace.name.clone())
                        .legend(move |(x, y)| {
                            PathElement::new(vec![(x - 8, y), (x + 8, y)], color)
                        });
                    chart
                        .draw_series(
                            points
                                .iter()
                                .map(|&(x, y)| Circle::new((x, y), 3, color.filled())),
                        )
                        .map_err(draw_err)?;
                }
            }

            chart
                .configure_series_labels()
                .border_style(&BLACK)
                .background_style(&WHITE.mix(0.8))
                .draw()
                .map_err(draw_err)?;

            root.present().map_err(draw_err)?;
        }
        Ok(svg)
    }
}

fn draw_err(e: impl std::fmt::Display) -> Error {
    Error::Other(anyhow::anyhow!("figure rendering failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> RdPoint {
        RdPoint {
            name: "model".to_string(),
            epoch: 10,
            loss: 1.0,
            bpp: 0.8,
            psnr: 32.0,
        }
    }

    fn reference() -> Vec<RdSeries> {
        vec![RdSeries {
            name: "jpeg".to_string(),
            x: vec![0.25, 0.5, 1.0],
            y: vec![27.0, 30.0, 33.5],
        }]
    }

    #[test]
    fn test_default_layout_axes() {
        let layout = RdPlotLayout::default();
        assert_eq!(layout.xaxis.range, (0.0, 2.25));
        assert_eq!(layout.xaxis.dtick, 0.25);
        assert_eq!(layout.yaxis.range, (26.0, 41.0));
        assert_eq!(layout.yaxis.dtick, 1.0);
    }

    #[test]
    fn test_caller_overrides_take_precedence() {
        let overrides = LayoutOverrides {
            yaxis: Some(AxisSpec {
                title: "MS-SSIM [dB]".to_string(),
                range: (10.0, 25.0),
                dtick: 2.5,
            }),
            ..Default::default()
        };
        let figure = plot_rd(&reference(), &current(), &overrides);
        assert_eq!(figure.layout.yaxis.range, (10.0, 25.0));
        // Unset axes keep the defaults.
        assert_eq!(figure.layout.xaxis.range, (0.0, 2.25));
    }

    #[test]
    fn test_trace_structure() {
        let figure = plot_rd(&reference(), &current(), &LayoutOverrides::default());
        assert_eq!(figure.traces.len(), 2);
        assert!(!figure.traces[0].highlight);
        let last = figure.traces.last().unwrap();
        assert!(last.highlight);
        assert_eq!(last.name, "model*");
        assert_eq!(last.x, vec![0.8]);
    }

    #[test]
    fn test_render_svg_smoke() {
        let figure = plot_rd(&reference(), &current(), &LayoutOverrides::default());
        let svg = figure.render_svg(640, 480).unwrap();
        assert!(svg.contains("<svg"));
    }
}
