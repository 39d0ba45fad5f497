/// Whether the secondary index may be used. Decided once at startup and handed to the
/// cache; changing it requires a restart so the cache never mixes entries fetched
/// under both consistency models.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FeatureGate {
    enabled: bool,
}

impl FeatureGate {
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub const fn enabled() -> Self {
        Self::new(true)
    }

    pub const fn disabled() -> Self {
        Self::new(false)
    }

    /// Interpret a configuration value. Anything other than an explicit "on" keeps the
    /// gate closed.
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim().to_ascii_lowercase();
        Self::new(matches!(value.as_str(), "1" | "true" | "yes" | "on"))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
