//! Video resolution and bitrate negotiation against device encoder limits.
//!
//! Encoders on some devices only accept a whitelist of sizes, so when the
//! native display does not fit the limits we pick the largest standard
//! resolution with exactly the same aspect ratio, or a minimal 4:3 size.

use crate::models::error::RecorderError;
use crate::models::media::{EncoderCapability, Resolution, VideoEncoderConfig};
use crate::traits::encoder::CapabilitySource;

/// Standard resolutions, landscape-normalized. Entries that are not
/// multiples of 8 are left out.
pub const STANDARD_RESOLUTIONS: [(u32, u32); 20] = [
    // CEA
    (640, 480),
    (720, 480),
    (720, 576),
    (1280, 720),
    (1920, 1080),
    // VESA
    (800, 600),
    (1024, 768),
    (1152, 864),
    (1280, 768),
    (1280, 800),
    (1360, 768),
    (1366, 768),
    (1280, 1024),
    (1600, 1200),
    (1920, 1200),
    // handheld
    (800, 480),
    (854, 480),
    (864, 480),
    (640, 360),
    (848, 480),
];

/// Limits used when the device exposes no capability source at all.
pub const FALLBACK_CAPABILITY: EncoderCapability = EncoderCapability {
    max_width: 640,
    max_height: 480,
    max_bitrate: 2_000_000,
};

/// Negotiated encoder size and bitrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProfile {
    pub resolution: Resolution,
    pub bitrate: u32,
}

/// Encoder limits: the codec table entry, else the default profile, else 640x480 @ 2 Mbps.
pub fn resolve_capability(source: Option<&dyn CapabilitySource>) -> EncoderCapability {
    let Some(source) = source else {
        log::info!("No capability source, using {}x{} fallback", FALLBACK_CAPABILITY.max_width, FALLBACK_CAPABILITY.max_height);
        return FALLBACK_CAPABILITY;
    };

    if let Some(cap) = source.encoder_capability(VideoEncoderConfig::AVC_MIME) {
        return cap;
    }
    match source.default_profile() {
        Some(cap) => {
            log::info!("No h264 encoder capability entry, using default profile");
            cap
        }
        None => {
            log::info!("No default profile, using fallback capability");
            FALLBACK_CAPABILITY
        }
    }
}

/// Pick the encoder resolution for a display of size `native`.
///
/// `max_dimension` further caps the short side.
pub fn negotiate_profile(
    native: Resolution,
    capability: EncoderCapability,
    max_dimension: Option<u32>,
) -> Result<VideoProfile, RecorderError> {
    if native.width == 0 || native.height == 0 {
        return Err(RecorderError::FormatNegotiationFailed(format!(
            "invalid native resolution {}",
            native
        )));
    }

    let max = capability.max_width.max(capability.max_height);
    let mut min = capability.max_width.min(capability.max_height);

    let landscape = native.is_landscape();
    let (long, short) = if landscape {
        (native.width, native.height)
    } else {
        (native.height, native.width)
    };
    let ratio = long as f64 / short as f64;

    if let Some(limit) = max_dimension {
        if short > limit {
            min = min.min(limit);
        }
    }

    let profile = |long: u32, short: u32| VideoProfile {
        resolution: if landscape {
            Resolution::new(long, short)
        } else {
            Resolution::new(short, long)
        },
        bitrate: capability.max_bitrate,
    };

    if long <= max && short <= min {
        return Ok(profile(long, short));
    }

    let mut best: Option<(u32, u32)> = None;
    for &(w, h) in STANDARD_RESOLUTIONS.iter() {
        if w > max || h > min {
            continue;
        }
        if best.is_some_and(|(best_w, _)| w <= best_w) {
            continue;
        }
        if w as f64 / h as f64 == ratio {
            best = Some((w, h));
        }
    }

    let (w, h) = best.unwrap_or_else(|| {
        log::warn!("No standard resolution matches {}, using minimal 640x480", native);
        (640, 480)
    });
    Ok(profile(w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP_1080P: EncoderCapability = EncoderCapability {
        max_width: 1920,
        max_height: 1080,
        max_bitrate: 12_000_000,
    };

    struct Table {
        codec: Option<EncoderCapability>,
        profile: Option<EncoderCapability>,
    }

    impl CapabilitySource for Table {
        fn encoder_capability(&self, mime: &str) -> Option<EncoderCapability> {
            assert_eq!(mime, "video/avc");
            self.codec
        }

        fn default_profile(&self) -> Option<EncoderCapability> {
            self.profile
        }
    }

    #[test]
    fn fitting_native_resolution_is_kept() {
        let p = negotiate_profile(Resolution::new(1080, 1920), CAP_1080P, None).unwrap();
        assert_eq!(p.resolution, Resolution::new(1080, 1920));
        assert_eq!(p.bitrate, 12_000_000);
    }

    #[test]
    fn oversized_portrait_picks_largest_matching_ratio() {
        let p = negotiate_profile(Resolution::new(1440, 2560), CAP_1080P, None).unwrap();
        assert_eq!(p.resolution, Resolution::new(1080, 1920));
    }

    #[test]
    fn oversized_landscape_stays_landscape() {
        let p = negotiate_profile(Resolution::new(2560, 1600), CAP_1080P, None).unwrap();
        // 16:10 entries within 1920x1080: 1280x800 only
        assert_eq!(p.resolution, Resolution::new(1280, 800));
    }

    #[test]
    fn max_dimension_caps_short_side() {
        let p = negotiate_profile(Resolution::new(1440, 2560), CAP_1080P, Some(720)).unwrap();
        assert_eq!(p.resolution, Resolution::new(720, 1280));
    }

    #[test]
    fn unmatched_ratio_falls_back_to_minimal() {
        let portrait = negotiate_profile(Resolution::new(1080, 2340), CAP_1080P, Some(720)).unwrap();
        assert_eq!(portrait.resolution, Resolution::new(480, 640));

        let landscape = negotiate_profile(Resolution::new(2340, 1080), CAP_1080P, Some(720)).unwrap();
        assert_eq!(landscape.resolution, Resolution::new(640, 480));
    }

    #[test]
    fn zero_native_size_fails() {
        let err = negotiate_profile(Resolution::new(0, 1920), CAP_1080P, None).unwrap_err();
        assert!(matches!(err, RecorderError::FormatNegotiationFailed(_)));
    }

    #[test]
    fn capability_lookup_order() {
        let profile_cap = EncoderCapability {
            max_width: 1280,
            max_height: 720,
            max_bitrate: 5_000_000,
        };

        let codec_first = Table { codec: Some(CAP_1080P), profile: Some(profile_cap) };
        assert_eq!(resolve_capability(Some(&codec_first as &dyn CapabilitySource)), CAP_1080P);

        let profile_only = Table { codec: None, profile: Some(profile_cap) };
        assert_eq!(resolve_capability(Some(&profile_only as &dyn CapabilitySource)), profile_cap);

        let empty = Table { codec: None, profile: None };
        assert_eq!(resolve_capability(Some(&empty as &dyn CapabilitySource)), FALLBACK_CAPABILITY);
        assert_eq!(resolve_capability(None), FALLBACK_CAPABILITY);
    }

    #[test]
    fn fallback_capability_shrinks_full_hd() {
        let p = negotiate_profile(Resolution::new(1080, 1920), FALLBACK_CAPABILITY, None).unwrap();
        assert_eq!(p.resolution, Resolution::new(360, 640));
        assert_eq!(p.bitrate, 2_000_000);
    }
}
