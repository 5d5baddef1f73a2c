use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::frame::CfaPattern;
use crate::capture::v4l2::bayer_fourcc;

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub pattern: CfaPattern,
}

fn pattern_for_fourcc(fourcc: FourCC) -> Option<CfaPattern> {
    [
        CfaPattern::Grbg,
        CfaPattern::Rggb,
        CfaPattern::Gbrg,
        CfaPattern::Bggr,
    ]
    .into_iter()
    .find(|&pattern| bayer_fourcc(pattern) == fourcc)
}

/// Scan `/dev/video*` for nodes that can capture raw Bayer frames.
pub fn list_candidate_devices() -> Vec<FoundDevice> {
    let mut found = Vec::new();

    for i in 0..10 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        if let Some(pattern) = formats
            .iter()
            .find_map(|fmt| pattern_for_fourcc(fmt.fourcc))
        {
            info!("found raw device: {} - {} ({:?})", path, caps.card, pattern);
            found.push(FoundDevice { path, pattern });
        }
    }

    found
}

/// First raw-capable capture device on the system.
pub fn auto_detect_device() -> Result<FoundDevice> {
    info!("auto-detecting capture devices...");
    list_candidate_devices()
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("no raw-capable capture device found"))
}
