use crate::{
    api,
    auth::{AuthConfig, AuthSecrets, two_factor::TwoFactorConfig},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub frontend_base_url: String,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub token_ttl_seconds: i64,
    pub two_factor_session_ttl_seconds: i64,
    pub two_factor_max_attempts: u32,
    pub totp_issuer: String,
    pub backup_code_pepper: SecretString,
    pub max_delegation_minutes: i64,
}

impl Args {
    /// Auth configuration derived from the arguments.
    ///
    /// # Errors
    /// Returns an error if the frontend base URL is not a valid URL.
    pub fn auth_config(&self) -> Result<AuthConfig> {
        let frontend_base_url = Url::parse(&self.frontend_base_url)
            .with_context(|| format!("Invalid frontend base URL: {}", self.frontend_base_url))?;

        Ok(AuthConfig::new(frontend_base_url)
            .with_token_issuer(self.token_issuer.clone())
            .with_token_ttl_seconds(self.token_ttl_seconds)
            .with_two_factor(
                TwoFactorConfig::new()
                    .with_session_ttl_seconds(self.two_factor_session_ttl_seconds)
                    .with_max_attempts(self.two_factor_max_attempts),
            )
            .with_totp_issuer(self.totp_issuer.clone())
            .with_max_delegation_minutes(self.max_delegation_minutes))
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = args.auth_config()?;
    debug!("Auth config: {:?}", auth_config);

    let secrets = AuthSecrets {
        token_secret: args.token_secret,
        backup_code_pepper: args.backup_code_pepper,
    };

    api::new(args.port, args.dsn, auth_config, secrets).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(frontend_base_url: &str) -> Args {
        Args {
            port: 8080,
            dsn: None,
            frontend_base_url: frontend_base_url.to_string(),
            token_secret: SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
            token_issuer: "warden".to_string(),
            token_ttl_seconds: 3600,
            two_factor_session_ttl_seconds: 120,
            two_factor_max_attempts: 3,
            totp_issuer: "Warden".to_string(),
            backup_code_pepper: SecretString::from("pepper".to_string()),
            max_delegation_minutes: 60,
        }
    }

    #[test]
    fn auth_config_carries_arguments() {
        let config = args("https://app.example.com").auth_config().unwrap();
        assert_eq!(config.token_ttl_seconds(), 3600);
        assert_eq!(config.max_delegation_minutes(), 60);
        assert_eq!(config.two_factor().max_attempts(), 3);
        assert_eq!(config.frontend_host(), "app.example.com");
    }

    #[test]
    fn invalid_frontend_url_is_rejected() {
        assert!(args("not a url").auth_config().is_err());
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let rendered = format!("{:?}", args("https://app.example.com"));
        assert!(!rendered.contains("0123456789abcdef"));
        assert!(!rendered.contains("pepper\""));
    }
}
