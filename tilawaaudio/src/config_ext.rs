//! Extension of tilawaconfig for audio playback settings

use std::time::Duration;

use tracing::warn;

use crate::auto_advance::AutoAdvancePreference;
use crate::coordinator::NotifyPolicy;
use crate::sources::{Pronunciation, Reciter};

/// Extension trait for `tilawaconfig::Config`
pub trait AudioConfigExt {
    /// Policy for the first `(true, source)` notification.
    fn notify_policy(&self) -> NotifyPolicy;

    /// Delay between two verses when auto-advancing.
    fn auto_advance_delay(&self) -> Duration;

    /// Per-candidate timeout for fallback playback; `None` when set to 0.
    fn fallback_timeout(&self) -> Option<Duration>;

    fn reciter(&self) -> Reciter;

    fn pronunciation(&self) -> Pronunciation;
}

impl AudioConfigExt for tilawaconfig::Config {
    fn notify_policy(&self) -> NotifyPolicy {
        let raw = self.get_notify_policy().unwrap_or_default();
        raw.parse().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid audio.notify_policy, using optimistic");
            NotifyPolicy::default()
        })
    }

    fn auto_advance_delay(&self) -> Duration {
        match self.get_auto_advance_delay_ms() {
            Ok(ms) => Duration::from_millis(ms),
            Err(e) => {
                warn!(error = %e, "Cannot read auto-advance delay");
                crate::auto_advance::DEFAULT_ADVANCE_DELAY
            }
        }
    }

    fn fallback_timeout(&self) -> Option<Duration> {
        match self.get_fallback_timeout_ms() {
            Ok(0) => None,
            Ok(ms) => Some(Duration::from_millis(ms)),
            Err(e) => {
                warn!(error = %e, "Cannot read fallback timeout");
                None
            }
        }
    }

    fn reciter(&self) -> Reciter {
        let name = self
            .get_reciter_name()
            .unwrap_or_else(|_| crate::sources::DEFAULT_RECITER.to_string());
        let urls = self.get_reciter_base_urls().unwrap_or_default();
        if urls.is_empty() {
            warn!(reciter = %name, "No reciter mirror configured, using default");
            return Reciter::default();
        }
        Reciter::new(name, urls)
    }

    fn pronunciation(&self) -> Pronunciation {
        let base_url = self
            .get_pronunciation_base_url()
            .unwrap_or_else(|_| crate::sources::DEFAULT_PRONUNCIATION_URL.to_string());
        let language = self
            .get_pronunciation_language()
            .unwrap_or_else(|_| "ar".to_string());
        Pronunciation::new(base_url, language)
    }
}

impl AutoAdvancePreference for tilawaconfig::Config {
    fn auto_advance_enabled(&self) -> bool {
        self.get_auto_advance().unwrap_or_else(|e| {
            warn!(error = %e, "Cannot read auto-play preference, assuming enabled");
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tilawaconfig::Config;

    fn temp_config() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[test]
    fn test_defaults() {
        let (_dir, config) = temp_config();

        assert_eq!(config.notify_policy(), NotifyPolicy::Optimistic);
        assert_eq!(config.auto_advance_delay(), Duration::from_millis(500));
        assert_eq!(config.fallback_timeout(), Some(Duration::from_secs(8)));
        assert!(config.auto_advance_enabled());

        let reciter = config.reciter();
        assert_eq!(reciter.name(), "Alafasy_128kbps");
        assert_eq!(reciter.base_urls().len(), 2);
        assert_eq!(config.pronunciation(), Pronunciation::default());
    }

    #[test]
    fn test_preference_is_read_live() {
        let (_dir, config) = temp_config();
        config.set_auto_advance(false).unwrap();
        assert!(!config.auto_advance_enabled());
        config.set_auto_advance(true).unwrap();
        assert!(config.auto_advance_enabled());
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let (_dir, config) = temp_config();
        config.set_fallback_timeout_ms(0).unwrap();
        assert_eq!(config.fallback_timeout(), None);
    }

    #[test]
    fn test_confirmed_policy_and_bad_value() {
        let (_dir, config) = temp_config();
        config.set_notify_policy("confirmed".to_string()).unwrap();
        assert_eq!(config.notify_policy(), NotifyPolicy::Confirmed);

        config.set_notify_policy("eager".to_string()).unwrap();
        assert_eq!(config.notify_policy(), NotifyPolicy::Optimistic);
    }

    #[test]
    fn test_empty_mirror_list_falls_back_to_default() {
        let (_dir, config) = temp_config();
        config.set_reciter_base_urls(Vec::new()).unwrap();
        assert_eq!(config.reciter(), Reciter::default());
    }
}
