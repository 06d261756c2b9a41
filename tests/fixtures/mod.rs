//! Canned backend responses.
#![allow(dead_code)]

use std::io::Cursor;

use serde_json::{json, Value};

/// ComfyUI outputs map with two images on one node.
pub fn comfy_image_outputs() -> Value {
    json!({
        "9": {
            "images": [
                { "filename": "a.png", "subfolder": "", "type": "output" },
                { "filename": "b.png", "subfolder": "", "type": "output" }
            ]
        }
    })
}

/// Full `/history/{id}` entry for a WAN video run: a preview image node plus
/// a video combine node that reports under `gifs`.
pub fn wan_video_history_entry() -> Value {
    json!({
        "prompt": [7, "A1", {}],
        "outputs": {
            "40": {
                "images": [
                    { "filename": "preview_00001.png", "subfolder": "previews", "type": "temp" }
                ]
            },
            "52": {
                "gifs": [
                    {
                        "filename": "wan_00001.mp4",
                        "subfolder": "video",
                        "type": "output",
                        "format": "video/h264-mp4"
                    }
                ]
            }
        },
        "status": { "status_str": "success", "completed": true, "messages": [] }
    })
}

/// A finished workflow whose nodes produced no files.
pub fn outputs_without_files() -> Value {
    json!({ "node7": { "status": "done" } })
}

/// Analysis workflow reply with comma-separated tags and no mood.
pub fn analysis_result() -> Value {
    json!([{
        "text": "A lighthouse on a cliff at dusk, cinematic lighting",
        "tags": "lighthouse, coast, dusk",
        "confidence": 0.87,
        "style": "photographic"
    }])
}

/// A small valid PNG.
pub fn tiny_png() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 120, 40]));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("encode png");
    buffer.into_inner()
}
