use crate::types::{PredictionRequest, RenderingSpeed};

/// Seconds for a single image at the default tier.
const BASE_SECONDS: f64 = 30.0;
/// Extra seconds per additional image.
const PER_IMAGE_SECONDS: f64 = 10.0;

impl RenderingSpeed {
    /// Multiplier applied to the base estimate for this tier.
    pub fn eta_factor(&self) -> f64 {
        match self {
            RenderingSpeed::Flash => 0.5,
            RenderingSpeed::Turbo => 0.75,
            RenderingSpeed::Default => 1.0,
            RenderingSpeed::Quality => 2.0,
        }
    }
}

/// Initial time estimate in whole seconds for `num_images` at `speed`.
///
/// `30 + (n - 1) * 10`, scaled by the tier factor and rounded. A count of
/// zero is treated as one image.
pub fn estimate_seconds(num_images: u32, speed: RenderingSpeed) -> u32 {
    let extra_images = num_images.max(1) - 1;
    let base = BASE_SECONDS + f64::from(extra_images) * PER_IMAGE_SECONDS;
    (base * speed.eta_factor()).round() as u32
}

/// Initial time estimate for a request.
pub fn estimate_request(request: &PredictionRequest) -> u32 {
    estimate_seconds(request.num_images, request.rendering_speed)
}
