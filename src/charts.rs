// src/charts.rs
//
// Post-session charts drawn with `imageproc` onto RGBA canvases. Translucent
// fills go through a blending canvas. Each artifact is rendered and written
// independently; a failure in one becomes a diagnostic entry and never
// affects the others.

use crate::analysis::series_store::SeriesBuffers;
use crate::types::ChartConfig;

use ab_glyph::{FontRef, PxScale};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut, text_size, Blend,
};
use imageproc::rect::Rect;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const RIGHT_HAND_DISTRIBUTION: &str = "right_hand_distribution";
pub const LEFT_HAND_DISTRIBUTION: &str = "left_hand_distribution";
pub const ARMPIT_ANGLES_FIRST: &str = "armpit_angles_first";
pub const STROKES_DISTRIBUTION_FIRST: &str = "strokes_distribution_first";
pub const STROKE_RATE_VARIATION: &str = "stroke_rate_variation";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChartArtifact {
    Rendered { path: PathBuf },
    Failed { reason: String },
}

impl ChartArtifact {
    pub fn is_rendered(&self) -> bool {
        matches!(self, ChartArtifact::Rendered { .. })
    }
}

pub trait ChartRenderer: Send + Sync {
    fn render(
        &self,
        session_id: &str,
        series: &SeriesBuffers,
        fps: f64,
    ) -> BTreeMap<String, ChartArtifact>;
}

// ============================================================================
// STYLE
// ============================================================================

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const GRID: Rgba<u8> = Rgba([128, 128, 128, 110]);
const AXIS: Rgba<u8> = Rgba([60, 60, 60, 255]);
const INK: Rgba<u8> = Rgba([20, 20, 20, 255]);
const LEGEND_BG: Rgba<u8> = Rgba([255, 255, 255, 210]);
const GREEN: Rgba<u8> = Rgba([34, 139, 34, 255]);
const TRAIL_GREEN: Rgba<u8> = Rgba([34, 139, 34, 40]);
const RED: Rgba<u8> = Rgba([210, 30, 30, 255]);
const DARK_BLUE: Rgba<u8> = Rgba([0, 0, 139, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const LIGHT_GREEN: Rgba<u8> = Rgba([144, 238, 144, 204]);
const YELLOW: Rgba<u8> = Rgba([255, 255, 0, 128]);
const BAND_BLUE: Rgba<u8> = Rgba([8, 159, 255, 77]);

const MARGIN_LEFT: f32 = 64.0;
const MARGIN_RIGHT: f32 = 24.0;
const MARGIN_TOP: f32 = 40.0;
const MARGIN_BOTTOM: f32 = 48.0;
const MIN_WIDTH: u32 = 200;
const MIN_HEIGHT: u32 = 150;

const TITLE_PX: f32 = 18.0;
const LABEL_PX: f32 = 14.0;
const TICK_PX: f32 = 12.0;
const DASH_PX: f32 = 8.0;

const FONT_DATA: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

fn chart_font() -> Result<FontRef<'static>> {
    FontRef::try_from_slice(FONT_DATA)
        .map_err(|e| anyhow::anyhow!("Failed to load chart font: {}", e))
}

#[derive(Debug, Clone, Copy)]
enum Pattern {
    Solid,
    Dashed,
}

#[derive(Debug, Clone, Copy)]
enum Align {
    Left,
    Center,
    Right,
}

struct Labels {
    title: &'static str,
    x: &'static str,
    y: &'static str,
}

// ============================================================================
// CHART CANVAS
// ============================================================================

struct Chart {
    canvas: Blend<RgbaImage>,
    font: FontRef<'static>,
    x_range: (f64, f64),
    y_range: (f64, f64),
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl Chart {
    fn new(
        width: u32,
        height: u32,
        x_range: (f64, f64),
        y_range: (f64, f64),
        labels: &Labels,
    ) -> Result<Self> {
        let width = width.max(MIN_WIDTH);
        let height = height.max(MIN_HEIGHT);
        let mut chart = Self {
            canvas: Blend(RgbaImage::from_pixel(width, height, WHITE)),
            font: chart_font()?,
            x_range,
            y_range,
            left: MARGIN_LEFT,
            top: MARGIN_TOP,
            right: width as f32 - MARGIN_RIGHT,
            bottom: height as f32 - MARGIN_BOTTOM,
        };
        chart.grid();
        chart.axes(labels);
        Ok(chart)
    }

    fn size(&self) -> (u32, u32) {
        self.canvas.0.dimensions()
    }

    /// Maps data coordinates to pixels. Larger y values are drawn higher.
    fn to_px(&self, x: f64, y: f64) -> (f32, f32) {
        let fx = (x - self.x_range.0) / (self.x_range.1 - self.x_range.0);
        let fy = (y - self.y_range.0) / (self.y_range.1 - self.y_range.0);
        (
            self.left + fx as f32 * (self.right - self.left),
            self.bottom - fy as f32 * (self.bottom - self.top),
        )
    }

    fn stroke(
        &mut self,
        a: (f32, f32),
        b: (f32, f32),
        color: Rgba<u8>,
        pattern: Pattern,
        thickness: u32,
    ) {
        let (pieces, step) = match pattern {
            Pattern::Solid => (1, 1),
            Pattern::Dashed => {
                let len = (b.0 - a.0).hypot(b.1 - a.1);
                ((len / DASH_PX).ceil().max(1.0) as usize, 2)
            }
        };
        let at = |t: f32| (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t);
        for k in (0..pieces).step_by(step) {
            let p = at(k as f32 / pieces as f32);
            let q = at((k + 1) as f32 / pieces as f32);
            for offset in 0..thickness {
                let o = offset as f32;
                draw_line_segment_mut(&mut self.canvas, (p.0, p.1 + o), (q.0, q.1 + o), color);
            }
        }
    }

    fn text(&mut self, x: f32, y: f32, px: f32, align: Align, text: &str) {
        let (w, _) = text_size(PxScale::from(px), &self.font, text);
        let x = match align {
            Align::Left => x,
            Align::Center => x - w as f32 / 2.0,
            Align::Right => x - w as f32,
        };
        draw_text_mut(
            &mut self.canvas,
            INK,
            x.round() as i32,
            y.round() as i32,
            PxScale::from(px),
            &self.font,
            text,
        );
    }

    fn grid(&mut self) {
        for i in 1..10 {
            let f = i as f32 / 10.0;
            let gx = self.left + (self.right - self.left) * f;
            let gy = self.top + (self.bottom - self.top) * f;
            self.stroke((gx, self.top), (gx, self.bottom), GRID, Pattern::Dashed, 1);
            self.stroke((self.left, gy), (self.right, gy), GRID, Pattern::Dashed, 1);
        }
    }

    fn axes(&mut self, labels: &Labels) {
        let (width, height) = self.size();
        let frame = Rect::at(self.left as i32, self.top as i32).of_size(
            (self.right - self.left).max(1.0) as u32,
            (self.bottom - self.top).max(1.0) as u32,
        );
        draw_hollow_rect_mut(&mut self.canvas, frame, AXIS);

        // Titles wider than the canvas are shrunk to fit.
        let (title_w, _) = text_size(PxScale::from(TITLE_PX), &self.font, labels.title);
        let title_px = if title_w as f32 > width as f32 - 8.0 {
            TITLE_PX * (width as f32 - 8.0) / title_w as f32
        } else {
            TITLE_PX
        };
        self.text(width as f32 / 2.0, 6.0, title_px, Align::Center, labels.title);
        self.text(
            (self.left + self.right) / 2.0,
            height as f32 - LABEL_PX - 8.0,
            LABEL_PX,
            Align::Center,
            labels.x,
        );
        self.text(4.0, self.top - LABEL_PX - 4.0, LABEL_PX, Align::Left, labels.y);

        for (f, x_align) in [(0.0, Align::Left), (0.5, Align::Center), (1.0, Align::Right)] {
            let xv = self.x_range.0 + (self.x_range.1 - self.x_range.0) * f;
            let yv = self.y_range.0 + (self.y_range.1 - self.y_range.0) * f;
            let (px, py) = self.to_px(xv, yv);
            let x_tick = tick_label(xv, self.x_range);
            let y_tick = tick_label(yv, self.y_range);
            self.text(px, self.bottom + 4.0, TICK_PX, x_align, &x_tick);
            self.text(self.left - 4.0, py - TICK_PX / 2.0, TICK_PX, Align::Right, &y_tick);
        }
    }

    /// Upper-left legend box: a colour swatch and a name per entry.
    fn legend(&mut self, entries: &[(&str, Rgba<u8>)]) {
        let text_w = entries
            .iter()
            .map(|(name, _)| text_size(PxScale::from(TICK_PX), &self.font, name).0)
            .max()
            .unwrap_or(0);
        let row = TICK_PX + 4.0;
        let x = self.left + 8.0;
        let y = self.top + 8.0;
        let bg = Rect::at(x as i32, y as i32)
            .of_size(text_w + 40, (row * entries.len() as f32 + 8.0) as u32);
        draw_filled_rect_mut(&mut self.canvas, bg, LEGEND_BG);
        draw_hollow_rect_mut(&mut self.canvas, bg, GRID);

        for (i, (name, color)) in entries.iter().enumerate() {
            let ry = y + 4.0 + row * i as f32;
            let swatch = Rect::at(x as i32 + 6, (ry + row / 2.0) as i32 - 2).of_size(22, 4);
            draw_filled_rect_mut(&mut self.canvas, swatch, *color);
            self.text(x + 34.0, ry, TICK_PX, Align::Left, name);
        }
    }

    fn polyline(&mut self, points: &[(f64, f64)], color: Rgba<u8>, pattern: Pattern) {
        let pixels: Vec<(f32, f32)> = points
            .iter()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|&(x, y)| self.to_px(x, y))
            .collect();
        for pair in pixels.windows(2) {
            self.stroke(pair[0], pair[1], color, pattern, 2);
        }
    }

    fn dot(&mut self, x: f64, y: f64, radius: i32, color: Rgba<u8>) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        let (cx, cy) = self.to_px(x, y);
        draw_filled_circle_mut(
            &mut self.canvas,
            (cx.round() as i32, cy.round() as i32),
            radius,
            color,
        );
    }

    /// Fills between the baseline and each sample, one column per sample.
    fn area(&mut self, values: &[f64], color: Rgba<u8>) {
        let (_, base) = self.to_px(self.x_range.0, self.y_range.0.max(0.0));
        for (i, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                continue;
            }
            let (x0, y) = self.to_px(i as f64, v);
            let x1 = self.to_px(i as f64 + 1.0, v).0;
            let width = (x1.round() - x0.round()).max(1.0) as u32;
            let height = (y - base).abs().round().max(1.0) as u32;
            let column =
                Rect::at(x0.round() as i32, y.min(base).round() as i32).of_size(width, height);
            draw_filled_rect_mut(&mut self.canvas, column, color);
        }
    }

    fn hline(&mut self, y: f64, color: Rgba<u8>) {
        let (_, py) = self.to_px(self.x_range.0, y);
        self.stroke((self.left, py), (self.right, py), color, Pattern::Solid, 1);
    }

    fn band(&mut self, y_lo: f64, y_hi: f64, color: Rgba<u8>) {
        let (_, top) = self.to_px(self.x_range.0, y_hi);
        let (_, bottom) = self.to_px(self.x_range.0, y_lo);
        let rect = Rect::at(self.left as i32, top.min(bottom).round() as i32).of_size(
            (self.right - self.left).max(1.0) as u32,
            (bottom - top).abs().round().max(1.0) as u32,
        );
        draw_filled_rect_mut(&mut self.canvas, rect, color);
    }

    fn save(&self, path: &Path) -> Result<()> {
        self.canvas
            .0
            .save(path)
            .with_context(|| format!("Failed to write chart: {}", path.display()))
    }
}

fn tick_label(value: f64, range: (f64, f64)) -> String {
    if (range.1 - range.0).abs() >= 10.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}

/// Finite min/max with 5% padding. A flat series gets a unit window.
fn padded_range(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })?;
    if (hi - lo).abs() < f64::EPSILON {
        return Some((lo - 1.0, hi + 1.0));
    }
    let pad = (hi - lo) * 0.05;
    Some((lo - pad, hi + pad))
}

/// Jet-like colormap on [0, 1], half transparent.
fn jet(t: f64) -> Rgba<u8> {
    let t = t.clamp(0.0, 1.0);
    let channel = |offset: f64| ((1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0) * 255.0) as u8;
    Rgba([channel(3.0), channel(2.0), channel(1.0), 128])
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

// ============================================================================
// PNG RENDERER
// ============================================================================

pub struct PngChartRenderer {
    output_dir: PathBuf,
    first_seconds: f64,
    width: u32,
    height: u32,
}

impl PngChartRenderer {
    pub fn new(config: &ChartConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.output_dir),
            first_seconds: config.first_seconds,
            width: config.width,
            height: config.height,
        }
    }

    fn first_window(&self, len: usize, fps: f64) -> usize {
        let limit = (self.first_seconds * fps).round();
        if limit.is_finite() && limit > 0.0 {
            len.min(limit as usize)
        } else {
            len
        }
    }

    fn hand_distribution(
        &self,
        title: &'static str,
        widths: &[f64],
        heights: &[f64],
    ) -> Result<Chart> {
        let n = widths.len().min(heights.len());
        if n == 0 {
            anyhow::bail!("no frames with a detected pose");
        }
        let x_range = padded_range(widths[..n].iter().copied()).context("no finite widths")?;
        let y_range = padded_range(heights[..n].iter().copied()).context("no finite heights")?;

        let mut counts: HashMap<u64, usize> = HashMap::new();
        for h in &heights[..n] {
            *counts.entry(h.to_bits()).or_default() += 1;
        }

        let labels = Labels {
            title,
            x: "width(px)",
            y: "height(px)",
        };
        let mut chart = Chart::new(self.width / 2, self.height, x_range, y_range, &labels)?;
        let trail: Vec<(f64, f64)> = widths[..n]
            .iter()
            .copied()
            .zip(heights[..n].iter().copied())
            .collect();
        chart.polyline(&trail, TRAIL_GREEN, Pattern::Solid);
        for &(x, y) in &trail {
            let share = counts.get(&y.to_bits()).copied().unwrap_or(0) as f64 / n as f64;
            let radius = 2 + (share * 30.0).round() as i32;
            chart.dot(x, y, radius, jet(share));
        }
        Ok(chart)
    }

    fn armpit_angles(&self, series: &SeriesBuffers, fps: f64) -> Result<Chart> {
        let m = self.first_window(series.left_armpit_angle.len(), fps);
        if m == 0 {
            anyhow::bail!("no armpit angle samples");
        }
        let left = &series.left_armpit_angle[..m];
        let right = &series.right_armpit_angle[..m.min(series.right_armpit_angle.len())];
        let y_range = padded_range(left.iter().chain(right).copied().chain([0.0]))
            .context("no finite angles")?;

        let labels = Labels {
            title: "Armpit's angles distribution in first 10 seconds",
            x: "frames",
            y: "angles(°)",
        };
        let x_range = (0.0, m.max(2) as f64 - 1.0);
        let mut chart = Chart::new(self.width, self.height, x_range, y_range, &labels)?;
        chart.area(left, LIGHT_GREEN);
        chart.area(right, YELLOW);
        chart.polyline(&indexed(left), GREEN, Pattern::Solid);
        chart.polyline(&indexed(right), RED, Pattern::Solid);
        chart.legend(&[("Left armpit", GREEN), ("Right armpit", RED)]);
        Ok(chart)
    }

    fn strokes_distribution(&self, series: &SeriesBuffers, fps: f64) -> Result<Chart> {
        let m = self.first_window(series.left_wrist_height.len(), fps);
        if m == 0 {
            anyhow::bail!("no wrist height samples");
        }
        let take = |v: &[f64]| v[..m.min(v.len())].to_vec();
        let left = take(&series.left_wrist_height);
        let right = take(&series.right_wrist_height);
        let head = take(&series.head_height);
        let hip = take(&series.hip_height);
        let y_range = padded_range(
            left.iter()
                .chain(&right)
                .chain(&head)
                .chain(&hip)
                .copied(),
        )
        .context("no finite heights")?;

        let labels = Labels {
            title: "Distribution of strokes in first 10 seconds",
            x: "frames",
            y: "height(px)",
        };
        let x_range = (0.0, m.max(2) as f64 - 1.0);
        let mut chart = Chart::new(self.width, self.height, x_range, y_range, &labels)?;
        chart.polyline(&indexed(&left), GREEN, Pattern::Solid);
        chart.polyline(&indexed(&right), RED, Pattern::Solid);
        chart.polyline(&indexed(&head), DARK_BLUE, Pattern::Dashed);
        chart.polyline(&indexed(&hip), BLACK, Pattern::Dashed);
        chart.legend(&[
            ("Left hand", GREEN),
            ("Right hand", RED),
            ("Head", DARK_BLUE),
            ("Hip", BLACK),
        ]);
        Ok(chart)
    }

    fn stroke_rate_variation(&self, series: &SeriesBuffers) -> Result<Chart> {
        let rates = series.adjusted_rates();
        if rates.len() < 2 || series.time_offsets.len() < 2 {
            anyhow::bail!("needs at least 2 stroke-rate samples, have {}", rates.len());
        }
        // The first fold often spans the warm-up before steady paddling.
        let rates = &rates[1..];
        let times = &series.time_offsets[1..];
        let (mean, std) = mean_std(rates);

        let x_range = padded_range(times.iter().copied()).context("no finite time offsets")?;
        let y_range = padded_range(rates.iter().copied().chain([mean - std, mean + std]))
            .context("no finite rates")?;

        let labels = Labels {
            title: "Stroke rate variation in time",
            x: "Time (s)",
            y: "Strokes/min",
        };
        let mut chart = Chart::new(self.width, self.height, x_range, y_range, &labels)?;
        chart.band(mean - std, mean + std, BAND_BLUE);
        chart.hline(mean, RED);
        let points: Vec<(f64, f64)> = times.iter().copied().zip(rates.iter().copied()).collect();
        chart.polyline(&points, BLACK, Pattern::Dashed);
        for &(x, y) in &points {
            chart.dot(x, y, 4, BLACK);
        }
        chart.legend(&[("spm", BLACK), ("mean", RED), ("std", BAND_BLUE)]);
        Ok(chart)
    }

    fn write(&self, dir: &Path, key: &str, chart: Result<Chart>) -> ChartArtifact {
        let path = dir.join(format!("{}.png", key));
        match chart.and_then(|c| c.save(&path)) {
            Ok(_) => ChartArtifact::Rendered { path },
            Err(e) => {
                warn!("Chart '{}' not rendered: {:#}", key, e);
                ChartArtifact::Failed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }
}

impl ChartRenderer for PngChartRenderer {
    fn render(
        &self,
        session_id: &str,
        series: &SeriesBuffers,
        fps: f64,
    ) -> BTreeMap<String, ChartArtifact> {
        let dir = self.output_dir.join(session_id);
        let mut artifacts = BTreeMap::new();

        if let Err(e) = std::fs::create_dir_all(&dir) {
            let reason = format!("Failed to create chart directory {}: {}", dir.display(), e);
            warn!("{}", reason);
            for key in [
                RIGHT_HAND_DISTRIBUTION,
                LEFT_HAND_DISTRIBUTION,
                ARMPIT_ANGLES_FIRST,
                STROKES_DISTRIBUTION_FIRST,
                STROKE_RATE_VARIATION,
            ] {
                artifacts.insert(
                    key.to_string(),
                    ChartArtifact::Failed {
                        reason: reason.clone(),
                    },
                );
            }
            return artifacts;
        }

        let charts = [
            (
                RIGHT_HAND_DISTRIBUTION,
                self.hand_distribution(
                    "Right hand position distribution",
                    &series.right_wrist_width,
                    &series.right_wrist_height,
                ),
            ),
            (
                LEFT_HAND_DISTRIBUTION,
                self.hand_distribution(
                    "Left hand position distribution",
                    &series.left_wrist_width,
                    &series.left_wrist_height,
                ),
            ),
            (ARMPIT_ANGLES_FIRST, self.armpit_angles(series, fps)),
            (STROKES_DISTRIBUTION_FIRST, self.strokes_distribution(series, fps)),
            (STROKE_RATE_VARIATION, self.stroke_rate_variation(series)),
        ];

        for (key, chart) in charts {
            let artifact = self.write(&dir, key, chart);
            artifacts.insert(key.to_string(), artifact);
        }

        let rendered = artifacts.values().filter(|a| a.is_rendered()).count();
        info!(
            "Rendered {}/{} charts into {}",
            rendered,
            artifacts.len(),
            dir.display()
        );
        artifacts
    }
}

fn indexed(values: &[f64]) -> Vec<(f64, f64)> {
    values
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect()
}
