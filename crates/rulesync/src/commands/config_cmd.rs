//! Config subcommand handlers.

use std::fmt::Write as _;
use std::path::Path;

use secrecy::SecretString;

use rulesync_config::{Config, DeviceProfile, load_config_from, save_config_to, store_password};

use crate::cli::{AddDeviceArgs, ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_device {
        let _ = writeln!(out, "default_device = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);
    let _ = writeln!(out, "refresh_delay_ms = {}", cfg.defaults.refresh_delay_ms);
    let _ = writeln!(out, "idle_interval_ms = {}", cfg.defaults.idle_interval_ms);

    for (name, p) in &cfg.devices {
        let _ = writeln!(out);
        let _ = writeln!(out, "[devices.{name}]");
        let _ = writeln!(out, "host = \"{}\"", p.host);
        let _ = writeln!(out, "port = {}", p.port);
        let _ = writeln!(out, "username = \"{}\"", p.username);
        if p.password.is_some() {
            let _ = writeln!(out, "password = \"****\"");
        }
        if let Some(ref env) = p.password_env {
            let _ = writeln!(out, "password_env = \"{env}\"");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if !p.connect {
            let _ = writeln!(out, "connect = false");
        }
    }

    out.trim_end().to_owned()
}

fn prompt_password(name: &str) -> Result<SecretString, CliError> {
    let pass = rpassword::prompt_password(format!("Password for '{name}': "))?;
    if pass.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "cannot be empty".into(),
        });
    }
    Ok(SecretString::from(pass))
}

fn add_device(cfg: &mut Config, args: AddDeviceArgs) -> Result<String, CliError> {
    if cfg.devices.contains_key(&args.name) {
        return Err(CliError::Conflict {
            message: format!("profile '{}' already exists", args.name),
        });
    }

    let mut profile = DeviceProfile::new(args.host, args.username);
    profile.port = args.port;
    profile.password_env = args.password_env;
    profile.ca_cert = args.ca_cert;
    profile.connect = !args.offline;

    if args.keyring {
        store_password(&args.name, &prompt_password(&args.name)?)?;
    }

    if args.default || cfg.devices.is_empty() {
        cfg.default_device = Some(args.name.clone());
    }
    cfg.devices.insert(args.name.clone(), profile);
    Ok(args.name)
}

fn require_profile(cfg: &Config, name: &str) -> Result<(), CliError> {
    if cfg.devices.contains_key(name) {
        Ok(())
    } else {
        Err(CliError::ProfileNotFound { name: name.into() })
    }
}

// ── Handler ─────────────────────────────────────────────────────────

/// `path` is the config file every subcommand reads and writes.
pub fn handle(args: ConfigArgs, global: &GlobalOpts, path: &Path) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = load_config_from(path)?;
            output::print_output(&format_config_redacted(&cfg), global.quiet);
            Ok(())
        }

        ConfigCommand::AddDevice(add) => {
            let mut cfg = load_config_from(path)?;
            let name = add_device(&mut cfg, add)?;
            save_config_to(&cfg, path)?;
            output::notice(&format!("Profile '{name}' saved to {}", path.display()), global.quiet);
            Ok(())
        }

        ConfigCommand::RemoveDevice { name } => {
            let mut cfg = load_config_from(path)?;
            require_profile(&cfg, &name)?;
            cfg.devices.remove(&name);
            if cfg.default_device.as_deref() == Some(name.as_str()) {
                cfg.default_device = None;
            }
            save_config_to(&cfg, path)?;
            output::notice(&format!("Profile '{name}' removed"), global.quiet);
            Ok(())
        }

        ConfigCommand::SetPassword { name } => {
            let cfg = load_config_from(path)?;
            let name = match name.or_else(|| global.profile.clone()) {
                Some(name) => name,
                None => cfg.select(None)?.0.to_owned(),
            };
            require_profile(&cfg, &name)?;
            store_password(&name, &prompt_password(&name)?)?;
            output::notice(
                &format!("Password for '{name}' stored in system keyring"),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = load_config_from(path)?;
            require_profile(&cfg, &name)?;
            cfg.default_device = Some(name.clone());
            save_config_to(&cfg, path)?;
            output::notice(&format!("Default device set to '{name}'"), global.quiet);
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(name: &str) -> AddDeviceArgs {
        AddDeviceArgs {
            name: name.into(),
            host: format!("{name}.example.com"),
            port: 9090,
            username: "admin".into(),
            password_env: Some("LB_PASSWORD".into()),
            keyring: false,
            ca_cert: None,
            offline: false,
            default: false,
        }
    }

    #[test]
    fn first_device_becomes_default() {
        let mut cfg = Config::default();
        add_device(&mut cfg, args("lb1")).unwrap();
        add_device(&mut cfg, args("lb2")).unwrap();
        assert_eq!(cfg.default_device.as_deref(), Some("lb1"));
        assert_eq!(cfg.devices.len(), 2);
    }

    #[test]
    fn duplicate_profile_conflicts() {
        let mut cfg = Config::default();
        add_device(&mut cfg, args("lb1")).unwrap();
        let err = add_device(&mut cfg, args("lb1")).unwrap_err();
        assert!(matches!(err, CliError::Conflict { .. }));
    }

    #[test]
    fn redacted_view_masks_password() {
        let mut cfg = Config::default();
        let mut profile = DeviceProfile::new("lb1.example.com", "admin");
        profile.password = Some("hunter2".into());
        cfg.devices.insert("lb1".into(), profile);

        let shown = format_config_redacted(&cfg);
        assert!(shown.contains("[devices.lb1]"));
        assert!(shown.contains("password = \"****\""));
        assert!(!shown.contains("hunter2"));
    }
}
