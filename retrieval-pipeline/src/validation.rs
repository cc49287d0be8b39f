use std::{collections::HashMap, sync::Arc, time::Duration};

use common::{error::AppError, utils::config::AppConfig};
use serde::{Deserialize, Serialize};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;
use url::Url;

use crate::scoring::clamp_unit;

/// How a validator verdict changes a fused score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorPolicy {
    /// `(1 - weight) * combined + weight * confidence`; reject counts as confidence 0.
    Blend { weight: f32 },
    /// Drops rejected candidates and those below `min_confidence`; scores are untouched.
    Gate { min_confidence: f32 },
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self::Blend { weight: 0.3 }
    }
}

impl ValidatorPolicy {
    pub fn validate(&self) -> Result<(), AppError> {
        let value = match self {
            Self::Blend { weight } => *weight,
            Self::Gate { min_confidence } => *min_confidence,
        };
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "validator policy parameter must lie in [0, 1] (got {value})"
            )))
        }
    }

    /// New combined score, or `None` when the candidate should be removed.
    pub fn apply(&self, combined: f32, verdict: &ValidatorVerdict) -> Option<f32> {
        match (self, verdict) {
            (_, ValidatorVerdict::Accept) => Some(combined),
            (Self::Blend { weight }, ValidatorVerdict::Score { confidence }) => {
                Some(clamp_unit(
                    clamp_unit(*confidence).mul_add(*weight, combined * (1.0 - weight)),
                ))
            }
            (Self::Blend { weight }, ValidatorVerdict::Reject) => {
                Some(clamp_unit(combined * (1.0 - weight)))
            }
            (Self::Gate { min_confidence }, ValidatorVerdict::Score { confidence }) => {
                (*confidence >= *min_confidence).then_some(combined)
            }
            (Self::Gate { .. }, ValidatorVerdict::Reject) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidatorVerdict {
    Score { confidence: f32 },
    Accept,
    Reject,
}

impl ValidatorVerdict {
    pub const fn confidence(&self) -> f32 {
        match self {
            Self::Score { confidence } => clamp_unit(*confidence),
            Self::Accept => 1.0,
            Self::Reject => 0.0,
        }
    }
}

#[derive(Debug, Serialize)]
struct ValidationRequest<'a> {
    candidate_id: &'a str,
    query: &'a str,
}

/// Optional second opinion on top results, resolved once from configuration.
#[derive(Clone)]
pub struct SecondaryValidator {
    inner: ValidatorInner,
}

#[derive(Clone)]
enum ValidatorInner {
    Remote {
        client: reqwest::Client,
        endpoint: Url,
    },
    /// Precomputed verdicts, e.g. from an offline labelling run.
    Fixed {
        verdicts: Arc<HashMap<String, ValidatorVerdict>>,
    },
}

impl SecondaryValidator {
    pub fn remote(endpoint: Url, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: ValidatorInner::Remote { client, endpoint },
        })
    }

    pub fn fixed(verdicts: HashMap<String, ValidatorVerdict>) -> Self {
        Self {
            inner: ValidatorInner::Fixed {
                verdicts: Arc::new(verdicts),
            },
        }
    }

    /// `None` unless the validator is switched on in configuration.
    pub fn maybe_from_config(config: &AppConfig) -> Result<Option<Self>, AppError> {
        if !config.validator_enabled {
            return Ok(None);
        }
        let endpoint = config.validator_endpoint.clone().ok_or_else(|| {
            AppError::Validation(
                "validator_endpoint must be set when validator_enabled is true".to_string(),
            )
        })?;
        Self::remote(endpoint, Duration::from_millis(config.validator_timeout_ms)).map(Some)
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            ValidatorInner::Remote { .. } => "remote",
            ValidatorInner::Fixed { .. } => "fixed",
        }
    }

    pub async fn validate(
        &self,
        candidate_id: &str,
        query: &str,
    ) -> Result<ValidatorVerdict, AppError> {
        match &self.inner {
            ValidatorInner::Fixed { verdicts } => verdicts.get(candidate_id).cloned().ok_or_else(|| {
                AppError::ValidatorUnavailable(format!("no verdict for {candidate_id}"))
            }),
            ValidatorInner::Remote { client, endpoint } => {
                let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(2);
                let verdict = Retry::start(retry_strategy, move || async move {
                    client
                        .post(endpoint.clone())
                        .json(&ValidationRequest {
                            candidate_id,
                            query,
                        })
                        .send()
                        .await?
                        .error_for_status()?
                        .json::<ValidatorVerdict>()
                        .await
                })
                .await
                .map_err(|err| AppError::ValidatorUnavailable(err.to_string()))?;

                debug!(candidate_id, ?verdict, "Validator verdict received");
                Ok(verdict)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_mixes_confidence() {
        let policy = ValidatorPolicy::default();
        let blended = policy
            .apply(0.6, &ValidatorVerdict::Score { confidence: 0.9 })
            .expect("blend keeps candidate");
        assert!((blended - (0.7 * 0.6 + 0.3 * 0.9)).abs() < 1e-6);

        let rejected = policy
            .apply(0.6, &ValidatorVerdict::Reject)
            .expect("blend keeps rejected candidate");
        assert!((rejected - 0.42).abs() < 1e-6);

        assert_eq!(policy.apply(0.6, &ValidatorVerdict::Accept), Some(0.6));
    }

    #[test]
    fn gate_drops_rejections_and_low_confidence() {
        let policy = ValidatorPolicy::Gate {
            min_confidence: 0.5,
        };
        assert_eq!(policy.apply(0.7, &ValidatorVerdict::Reject), None);
        assert_eq!(
            policy.apply(0.7, &ValidatorVerdict::Score { confidence: 0.4 }),
            None
        );
        assert_eq!(
            policy.apply(0.7, &ValidatorVerdict::Score { confidence: 0.8 }),
            Some(0.7)
        );
    }

    #[test]
    fn policy_parameters_are_checked() {
        assert!(ValidatorPolicy::default().validate().is_ok());
        assert!(ValidatorPolicy::Blend { weight: 1.5 }.validate().is_err());
    }

    #[test]
    fn verdicts_use_tagged_json() {
        let verdict: ValidatorVerdict =
            serde_json::from_str(r#"{"verdict":"score","confidence":0.75}"#).expect("parse");
        assert_eq!(verdict, ValidatorVerdict::Score { confidence: 0.75 });
        let reject: ValidatorVerdict =
            serde_json::from_str(r#"{"verdict":"reject"}"#).expect("parse");
        assert!(reject.confidence().abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn fixed_validator_reports_missing_verdicts_as_unavailable() {
        let validator = SecondaryValidator::fixed(HashMap::from([(
            "c1".to_string(),
            ValidatorVerdict::Accept,
        )]));

        assert_eq!(
            validator.validate("c1", "dog").await.expect("verdict"),
            ValidatorVerdict::Accept
        );
        assert!(matches!(
            validator.validate("c2", "dog").await,
            Err(AppError::ValidatorUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_remote_validator_is_unavailable_after_retries() {
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .expect("free port");
        let endpoint = Url::parse(&format!("http://{addr}/validate")).expect("url");
        let validator =
            SecondaryValidator::remote(endpoint, Duration::from_millis(200)).expect("client");

        let result = validator.validate("c1", "dog").await;

        assert!(matches!(result, Err(AppError::ValidatorUnavailable(_))));
    }

    #[test]
    fn config_flag_gates_construction() {
        let disabled = AppConfig::default();
        assert!(SecondaryValidator::maybe_from_config(&disabled)
            .expect("disabled is fine")
            .is_none());

        let missing_endpoint = AppConfig {
            validator_enabled: true,
            ..AppConfig::default()
        };
        assert!(matches!(
            SecondaryValidator::maybe_from_config(&missing_endpoint),
            Err(AppError::Validation(_))
        ));

        let enabled = AppConfig {
            validator_enabled: true,
            validator_endpoint: Some(Url::parse("http://localhost:9000/v").expect("url")),
            ..AppConfig::default()
        };
        let validator = SecondaryValidator::maybe_from_config(&enabled)
            .expect("valid config")
            .expect("enabled");
        assert_eq!(validator.backend_label(), "remote");
    }
}
