// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Level rendering: color model, frame description and rasterization.
//!
//! Rendering is split in two pure steps. [`model::render`] maps a level and a
//! [`MeterConfig`] to a [`RenderFrame`] (split row plus fill pattern), and
//! [`raster::from_frame`] turns that description into an RGBA image that a host
//! surface can encode and ship.

pub mod color;
pub mod model;
pub mod raster;

pub use color::Rgb;
pub use model::{
    fill_fraction, fill_start_row, meter_color, render, render_muted, CanvasSize, ColorStop,
    FillPattern, Glyph, MeterConfig, RenderFrame, VisualStyle,
};
pub use image::RgbaImage;
