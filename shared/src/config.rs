use std::time::Duration;

/// Per-level gameplay parameters, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../client/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct GameplayParams {
    /// How long entries stay open after the first player enters
    pub entry_period_length: f64,
    /// Finish countdown shown to viewers once the first marble is home
    pub finish_period_length: f64,
    /// Time after the first finish before the round is ended (DNF)
    pub dnf_timeout: f64,
    /// Hard cap on the length of a race
    pub round_length: f64,
}

impl Default for GameplayParams {
    fn default() -> Self {
        Self {
            entry_period_length: 20.0,
            finish_period_length: 20.0,
            dnf_timeout: 20.0,
            round_length: 160.0,
        }
    }
}

impl GameplayParams {
    pub fn validate(&self) -> Result<(), String> {
        if !self.entry_period_length.is_finite() || self.entry_period_length < 0.0 {
            return Err("entry_period_length must be finite and >= 0".to_string());
        }
        if !self.finish_period_length.is_finite() || self.finish_period_length < 0.0 {
            return Err("finish_period_length must be finite and >= 0".to_string());
        }
        if !self.dnf_timeout.is_finite() || self.dnf_timeout <= 0.0 {
            return Err("dnf_timeout must be finite and > 0".to_string());
        }
        if !self.round_length.is_finite() || self.round_length <= 0.0 {
            return Err("round_length must be finite and > 0".to_string());
        }
        Ok(())
    }

    pub fn entry_period(&self) -> Duration {
        Duration::from_secs_f64(self.entry_period_length)
    }

    pub fn dnf_duration(&self) -> Duration {
        Duration::from_secs_f64(self.dnf_timeout)
    }

    pub fn round_duration(&self) -> Duration {
        Duration::from_secs_f64(self.round_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gameplay_params_are_valid() {
        assert!(GameplayParams::default().validate().is_ok());
    }

    #[test]
    fn negative_entry_period_invalid() {
        let params = GameplayParams {
            entry_period_length: -1.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn zero_round_length_invalid() {
        let params = GameplayParams {
            round_length: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn parses_camel_case_level_fields() {
        let json = r#"{"entryPeriodLength":5,"finishPeriodLength":10,"dnfTimeout":10,"roundLength":60}"#;
        let params: GameplayParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.entry_period(), Duration::from_secs(5));
        assert_eq!(params.round_duration(), Duration::from_secs(60));
    }
}
