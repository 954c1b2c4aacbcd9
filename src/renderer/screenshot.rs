//! Screenshot encoding

use crate::error::{RenderError, RenderResult};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Reverse the row order of a tightly packed image
pub fn flip_rows(pixels: &[u8], width: u32, height: u32, components: usize) -> Vec<u8> {
    let stride = width as usize * components;
    let mut flipped = Vec::with_capacity(pixels.len());
    for row in (0..height as usize).rev() {
        flipped.extend_from_slice(&pixels[row * stride..(row + 1) * stride]);
    }
    flipped
}

/// Civil date from days since 1970-01-01
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// `yyyy-MM-dd_HH.mm.ss.png` for the given instant, in UTC
pub fn timestamp_file_name(time: SystemTime) -> String {
    let seconds = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let (year, month, day) = civil_from_days(seconds.div_euclid(86_400));
    let of_day = seconds.rem_euclid(86_400);
    format!(
        "{:04}-{:02}-{:02}_{:02}.{:02}.{:02}.png",
        year,
        month,
        day,
        of_day / 3600,
        of_day % 3600 / 60,
        of_day % 60
    )
}

/// Write top-down RGB rows as a PNG into `dir`, named after `time`
pub fn write_png(dir: &Path, time: SystemTime, width: u32, height: u32, rgb: Vec<u8>) -> RenderResult<PathBuf> {
    let image = RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
        RenderError::InvalidConfiguration(format!(
            "screenshot buffer does not match a {width}x{height} RGB image"
        ))
    })?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(timestamp_file_name(time));
    image.save(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[test]
    fn test_flip_rows() {
        let pixels = [1, 1, 2, 2, 3, 3];
        assert_eq!(flip_rows(&pixels, 1, 3, 2), vec![3, 3, 2, 2, 1, 1]);
    }

    #[rstest]
    #[case(0, "1970-01-01_00.00.00.png")]
    #[case(951_782_400, "2000-02-29_00.00.00.png")]
    #[case(1_700_000_000, "2023-11-14_22.13.20.png")]
    fn test_timestamp_file_name(#[case] seconds: u64, #[case] expected: &str) {
        let time = UNIX_EPOCH + Duration::from_secs(seconds);
        assert_eq!(timestamp_file_name(time), expected);
    }

    #[test]
    fn test_mismatched_buffer_rejected() {
        let dir = std::env::temp_dir().join("deferred-graph-engine-screenshot-mismatch");
        let result = write_png(&dir, UNIX_EPOCH, 4, 4, vec![0; 10]);
        assert!(matches!(result, Err(RenderError::InvalidConfiguration(_))));
    }
}
