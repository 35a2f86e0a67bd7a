//! Engine configuration.
//!
//! Loadable from a TOML file the same way the teacher loads its
//! `ControlConfig`, or built programmatically with [`EngineConfig::default`]
//! plus field assignment.

use std::path::Path;

use serde::Deserialize;

use crate::address::Role;
use crate::error::ConfigError;

/// Radio physical-layer parameters, passed through to the [`crate::radio::RadioLink`]
/// collaborator's `configure` call. The engine does not interpret these beyond
/// validating `preamble_len`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct RadioPhyConfig {
    /// Center frequency band in Hz.
    pub band: f64,
    /// Bandwidth in Hz.
    pub bw: f64,
    /// Spreading factor.
    pub sf: u8,
    /// Coding rate denominator (4/cr).
    pub cr: u8,
    /// Network sync word.
    pub sync_word: u8,
    /// Transmit power in dBm.
    pub power: i8,
    /// Preamble length in symbols.
    pub preamble_len: u16,
}

impl Default for RadioPhyConfig {
    fn default() -> Self {
        RadioPhyConfig {
            band: 433.0e6,
            bw: 500_000.0,
            sf: 7,
            cr: 7,
            sync_word: 0x12,
            power: 22,
            preamble_len: 8,
        }
    }
}

/// Top-level engine configuration (§6).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Max wire frame size, 13..=255 (default 100).
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u16,
    /// Radio physical-layer parameters.
    #[serde(default)]
    pub radio: RadioPhyConfig,
    /// Fraction of time the radio may transmit, 0..=100.
    #[serde(default = "default_duty_cycle_pct")]
    pub duty_cycle_pct: u8,
    /// Hello emission period, seconds (default 5).
    #[serde(default = "default_hello_delay_s")]
    pub hello_delay_s: u64,
    /// Routing-entry GC tick, seconds (default 5, same as `DEFAULT_TIMEOUT`).
    #[serde(default = "default_routing_expire_s")]
    pub routing_expire_s: u64,
    /// Minimum retry tick for the reliable-transport timeout manager, seconds.
    #[serde(default = "default_min_timeout_s")]
    pub min_timeout_s: u64,
    /// Max retries before a sequence context is torn down as failed.
    #[serde(default = "default_max_timeouts")]
    pub max_timeouts: u32,
    /// Routing table capacity (default 256).
    #[serde(default = "default_rt_max_size")]
    pub rt_max_size: usize,
    /// Local role bitfield.
    #[serde(default, with = "role_serde")]
    pub role: Role,
    /// Whether payload CRC-16 is computed/validated on the wire (ambient addition).
    #[serde(default = "default_crc_enabled")]
    pub crc_enabled: bool,
    /// Routing-table snapshot period sent to the uplink, seconds.
    #[serde(default = "default_routing_table_update_delay_s")]
    pub routing_table_update_delay_s: u64,
    /// Maximum number of retransmits of a dropped frame before the TX task gives up.
    #[serde(default = "default_max_resend_packet")]
    pub max_resend_packet: u8,
}

fn default_max_packet_size() -> u16 {
    100
}
fn default_duty_cycle_pct() -> u8 {
    100
}
fn default_hello_delay_s() -> u64 {
    5
}
fn default_routing_expire_s() -> u64 {
    5
}
fn default_min_timeout_s() -> u64 {
    20
}
fn default_max_timeouts() -> u32 {
    10
}
fn default_rt_max_size() -> usize {
    256
}
fn default_crc_enabled() -> bool {
    false
}
fn default_routing_table_update_delay_s() -> u64 {
    2
}
fn default_max_resend_packet() -> u8 {
    3
}

mod role_serde {
    use super::Role;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(d: D) -> Result<Role, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Role::from_bits(u8::deserialize(d)?))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_packet_size: default_max_packet_size(),
            radio: RadioPhyConfig::default(),
            duty_cycle_pct: default_duty_cycle_pct(),
            hello_delay_s: default_hello_delay_s(),
            routing_expire_s: default_routing_expire_s(),
            min_timeout_s: default_min_timeout_s(),
            max_timeouts: default_max_timeouts(),
            rt_max_size: default_rt_max_size(),
            role: Role::DEFAULT,
            crc_enabled: default_crc_enabled(),
            routing_table_update_delay_s: default_routing_table_update_delay_s(),
            max_resend_packet: default_max_resend_packet(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: EngineConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every range invariant named in §6/§7. Called automatically by
    /// [`EngineConfig::load`]; callers building a config programmatically
    /// should call it before handing the config to [`crate::engine::Engine::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(13..=255).contains(&self.max_packet_size) {
            return Err(ConfigError::PacketSizeOutOfRange(self.max_packet_size));
        }
        if self.duty_cycle_pct > 100 {
            return Err(ConfigError::DutyCycleOutOfRange(self.duty_cycle_pct));
        }
        if self.rt_max_size == 0 {
            return Err(ConfigError::ZeroRoutingTableSize);
        }
        if self.max_timeouts == 0 {
            return Err(ConfigError::ZeroMaxTimeouts);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_oversize_packet_size() {
        let mut cfg = EngineConfig::default();
        cfg.max_packet_size = 12;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::PacketSizeOutOfRange(12))
        );
        cfg.max_packet_size = 256;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::PacketSizeOutOfRange(256))
        );
    }

    #[test]
    fn rejects_invalid_duty_cycle() {
        let mut cfg = EngineConfig::default();
        cfg.duty_cycle_pct = 150;
        assert_eq!(cfg.validate(), Err(ConfigError::DutyCycleOutOfRange(150)));
    }

    #[test]
    fn load_round_trips_a_toml_fixture() {
        let dir = std::env::temp_dir().join(format!(
            "loramesh-engine-config-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            r#"
                max-packet-size = 120
                duty-cycle-pct = 10
                role = 3

                [radio]
                band = 866.0e6
                bw = 125000.0
                sf = 9
                cr = 5
                sync-word = 18
                power = 14
                preamble-len = 8
            "#,
        )
        .unwrap();

        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.max_packet_size, 120);
        assert_eq!(cfg.duty_cycle_pct, 10);
        assert!(cfg.role.contains(Role::CLIENT));
        assert!(cfg.role.contains(Role::GATEWAY));
        assert_eq!(cfg.radio.sf, 9);

        std::fs::remove_dir_all(&dir).ok();
    }
}
