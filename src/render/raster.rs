// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! RGBA images painted from a [`RenderFrame`].

use crate::render::color::Rgb;
use crate::render::model::RenderFrame;
use image::{imageops, Rgba, RgbaImage};

fn pixel(color: Rgb) -> Rgba<u8> {
    Rgba(color.to_rgba())
}

/// An image filled with a single color.
pub fn solid(width: u32, height: u32, fill: Rgb) -> RgbaImage {
    RgbaImage::from_pixel(width, height, pixel(fill))
}

/// Paint a frame: background first, then the fill rows bottom-aligned.
pub fn from_frame(frame: &RenderFrame) -> RgbaImage {
    let mut image = solid(frame.width, frame.height, frame.background);
    if frame.height == 0 {
        return image;
    }

    let height = frame.height as f32;
    for row in frame.fill_rows() {
        // Sample the fill at the row center, measured from the bottom edge.
        let t = ((frame.height - row) as f32 - 0.5) / height;
        let color = pixel(frame.fill.color_at(t));
        for x in 0..frame.width {
            image.put_pixel(x, row, color);
        }
    }
    image
}

/// Dials show the meter sideways: rotate 90° clockwise so the bottom edge
/// becomes the left edge.
pub fn rotate_for_dial(image: &RgbaImage) -> RgbaImage {
    imageops::rotate90(image)
}
