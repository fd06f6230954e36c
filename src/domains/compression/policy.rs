//! Maps an original file size and a tier to a compression profile.
//!
//! The target size comes from the size bucket alone; the tier only shifts
//! quality and scale, so every tier of the same file aims for the same size.

use super::types::{CompressionProfile, CompressionTier};

const MB: f64 = 1024.0 * 1024.0;

/// A4 in points
const A4: (f32, f32) = (595.0, 842.0);
/// A3 in points
const A3: (f32, f32) = (842.0, 1191.0);

struct SizeBucket {
    target_size_kb: u64,
    quality: u8,
    scale: f32,
}

fn size_bucket(original_size_bytes: u64) -> SizeBucket {
    let size_mb = original_size_bytes as f64 / MB;
    if size_mb > 10.0 {
        SizeBucket { target_size_kb: 5632, quality: 25, scale: 0.55 }
    } else if size_mb > 5.0 {
        SizeBucket { target_size_kb: 1536, quality: 35, scale: 0.65 }
    } else if size_mb >= 1.0 {
        SizeBucket { target_size_kb: 800, quality: 45, scale: 0.75 }
    } else {
        let original_kb = original_size_bytes as f64 / 1024.0;
        SizeBucket {
            target_size_kb: (original_kb * 0.7).round() as u64,
            quality: 60,
            scale: 0.85,
        }
    }
}

/// Select the profile for one request. Pure: same input, same profile.
pub fn select_profile(original_size_bytes: u64, tier: CompressionTier) -> CompressionProfile {
    let bucket = size_bucket(original_size_bytes);

    let (quality, scale, page_bound) = match tier {
        CompressionTier::Light => (
            bucket.quality.saturating_add(20).min(85),
            (bucket.scale + 0.10).min(0.95),
            A3,
        ),
        CompressionTier::Recommended => (bucket.quality, bucket.scale, A4),
        CompressionTier::Extreme => (
            bucket.quality.saturating_sub(15).max(10),
            (bucket.scale - 0.15).max(0.30),
            A4,
        ),
    };
    let strip = tier != CompressionTier::Light;

    CompressionProfile {
        tier,
        target_size_kb: bucket.target_size_kb,
        quality,
        scale,
        remove_metadata: strip,
        remove_annotations: strip,
        recompress_images: strip,
        max_page_width: page_bound.0,
        max_page_height: page_bound.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KB: u64 = 1024;
    const ONE_MB: u64 = 1024 * 1024;

    #[test]
    fn twelve_megabytes_lands_in_largest_bucket() {
        let profile = select_profile(12 * ONE_MB, CompressionTier::Recommended);
        assert_eq!(profile.target_size_kb, 5632);
        assert_eq!(profile.quality, 25);
        assert!((profile.scale - 0.55).abs() < f32::EPSILON);
    }

    #[test]
    fn bucket_boundaries() {
        assert_eq!(select_profile(10 * ONE_MB, CompressionTier::Recommended).target_size_kb, 1536);
        assert_eq!(select_profile(10 * ONE_MB + 1, CompressionTier::Recommended).target_size_kb, 5632);
        assert_eq!(select_profile(5 * ONE_MB, CompressionTier::Recommended).target_size_kb, 800);
        assert_eq!(select_profile(ONE_MB, CompressionTier::Recommended).target_size_kb, 800);
        assert_eq!(select_profile(ONE_MB - 1, CompressionTier::Recommended).quality, 60);
    }

    #[test]
    fn half_megabyte_targets_seventy_percent_for_every_tier() {
        for tier in CompressionTier::ALL {
            let profile = select_profile(512 * KB, tier);
            assert_eq!(profile.target_size_kb, 358, "tier {}", tier);
        }
    }

    #[test]
    fn empty_file_is_valid_input() {
        let profile = select_profile(0, CompressionTier::Extreme);
        assert_eq!(profile.target_size_kb, 0);
    }

    #[test]
    fn aggressiveness_is_monotonic_across_tiers() {
        for size in [0, 300 * KB, 3 * ONE_MB, 7 * ONE_MB, 40 * ONE_MB] {
            let light = select_profile(size, CompressionTier::Light);
            let recommended = select_profile(size, CompressionTier::Recommended);
            let extreme = select_profile(size, CompressionTier::Extreme);

            assert!(extreme.target_size_kb <= recommended.target_size_kb);
            assert!(recommended.target_size_kb <= light.target_size_kb);
            assert!(extreme.scale <= recommended.scale);
            assert!(recommended.scale <= light.scale);
            assert!(extreme.quality <= recommended.quality);
            assert!(recommended.quality <= light.quality);
        }
    }

    #[test]
    fn only_light_keeps_metadata_and_annotations() {
        let light = select_profile(2 * ONE_MB, CompressionTier::Light);
        assert!(!light.remove_metadata);
        assert!(!light.remove_annotations);
        assert!(!light.recompress_images);

        for tier in [CompressionTier::Recommended, CompressionTier::Extreme] {
            let profile = select_profile(2 * ONE_MB, tier);
            assert!(profile.remove_metadata);
            assert!(profile.remove_annotations);
        }
    }

    #[test]
    fn selection_is_pure() {
        for tier in CompressionTier::ALL {
            assert_eq!(select_profile(6 * ONE_MB, tier), select_profile(6 * ONE_MB, tier));
        }
    }
}
