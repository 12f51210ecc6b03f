use clap::{Arg, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_TWO_FACTOR_SESSION_TTL_SECONDS: &str = "two-factor-session-ttl-seconds";
pub const ARG_TWO_FACTOR_MAX_ATTEMPTS: &str = "two-factor-max-attempts";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_BACKUP_CODE_PEPPER: &str = "backup-code-pepper";
pub const ARG_MAX_DELEGATION_MINUTES: &str = "max-delegation-minutes";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_two_factor_args(command);
    with_delegation_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL; tenant subdomains hang off its host")
                .env("WARDEN_FRONTEND_BASE_URL")
                .default_value("https://warden.dev"),
        )
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret used to sign session tokens (at least 32 bytes)")
                .env("WARDEN_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer written into and required from session tokens")
                .env("WARDEN_TOKEN_ISSUER")
                .default_value("warden"),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Session token TTL in seconds")
                .env("WARDEN_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(60..)),
        )
}

fn with_two_factor_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TWO_FACTOR_SESSION_TTL_SECONDS)
                .long(ARG_TWO_FACTOR_SESSION_TTL_SECONDS)
                .help("Lifetime of a pending two-factor login in seconds")
                .env("WARDEN_2FA_SESSION_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TWO_FACTOR_MAX_ATTEMPTS)
                .long(ARG_TWO_FACTOR_MAX_ATTEMPTS)
                .help("Failed codes allowed per pending two-factor login")
                .env("WARDEN_2FA_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown in authenticator apps")
                .env("WARDEN_TOTP_ISSUER")
                .default_value("Warden"),
        )
        .arg(
            Arg::new(ARG_BACKUP_CODE_PEPPER)
                .long(ARG_BACKUP_CODE_PEPPER)
                .help("Server-side pepper mixed into backup code hashes")
                .env("WARDEN_BACKUP_CODE_PEPPER")
                .hide_env_values(true)
                .required(true),
        )
}

fn with_delegation_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_MAX_DELEGATION_MINUTES)
            .long(ARG_MAX_DELEGATION_MINUTES)
            .help("Upper bound for secure login and impersonation durations")
            .env("WARDEN_MAX_DELEGATION_MINUTES")
            .default_value("480")
            .value_parser(clap::value_parser!(i64).range(1..)),
    )
}
