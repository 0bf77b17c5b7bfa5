//! Recommended UI scale factor from panel density

use crate::constants::scale;
use crate::monitor::Monitor;

/// Scale for one panel relative to a 24" 1080p reference
pub fn scale_factor(width_px: f64, height_px: f64, width_mm: f64, height_mm: f64) -> f64 {
    if width_mm == 0.0 || height_mm == 0.0 {
        return scale::MIN;
    }
    let len_px = width_px.hypot(height_px);
    let len_mm = width_mm.hypot(height_mm);
    let ref_px = scale::REF_WIDTH_PX.hypot(scale::REF_HEIGHT_PX);
    let ref_mm = scale::REF_WIDTH_MM.hypot(scale::REF_HEIGHT_MM);

    let correction = (len_mm - ref_mm) * (len_px / ref_px) * scale::SIZE_CORRECTION;
    snap((len_px / len_mm) / (ref_px / ref_mm) + correction)
}

/// Nearest step in range; exact midpoints round up
fn snap(value: f64) -> f64 {
    if value <= scale::MIN {
        return scale::MIN;
    }
    if value >= scale::MAX {
        return scale::MAX;
    }
    let steps = ((value - scale::MIN) / scale::STEP).round();
    scale::MIN + steps * scale::STEP
}

/// Smallest factor across the connected monitors, 1.0 when none
pub fn recommended(connected: &[Monitor]) -> f64 {
    connected
        .iter()
        .map(|m| {
            let mode = if m.current_mode.is_empty() {
                m.best_mode()
            } else {
                m.current_mode.clone()
            };
            scale_factor(
                mode.width as f64,
                mode.height as f64,
                m.mm_width as f64,
                m.mm_height as f64,
            )
        })
        .reduce(f64::min)
        .unwrap_or(scale::MIN)
}
