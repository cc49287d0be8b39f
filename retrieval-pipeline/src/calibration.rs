use common::error::AppError;

pub const DEFAULT_TEMPERATURE: f32 = 25.0;

/// Maps a raw cosine similarity onto a bounded confidence with `sigmoid(raw * temperature)`.
///
/// Contrastive image/text encoders produce similarities clustered in a narrow band around
/// zero; the temperature stretches that band over the unit interval. Saturates to exactly
/// `0.0` or `1.0` for large magnitudes instead of overflowing.
pub fn calibrate(raw: f32, temperature: f32) -> Result<f32, AppError> {
    if !raw.is_finite() {
        return Err(AppError::InvalidScore(raw));
    }
    if !temperature.is_finite() || temperature <= 0.0 {
        return Err(AppError::InvalidScore(temperature));
    }

    let x = f64::from(raw) * f64::from(temperature);
    let score = if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    };

    #[allow(clippy::cast_possible_truncation)]
    Ok((score as f32).clamp(0.0, 1.0))
}
