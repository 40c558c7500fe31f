#![allow(dead_code)]

use std::sync::Arc;

use warden::{
    JwtConfig, LoginOutcome, LoginRequest, MemoryEmailSender, MemoryRepositoryProvider,
    SecuritySettings, User, Warden, WardenBuilder,
};
use warden_core::{
    repositories::{UserRepository, UserRepositoryProvider},
    totp::{TotpConfig, TotpGenerator},
};

pub const PASSWORD: &str = "correct horse battery staple";

pub struct Harness {
    pub warden: Warden<MemoryRepositoryProvider>,
    pub mailer: MemoryEmailSender,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub async fn harness() -> Harness {
    harness_with(SecuritySettings::default()).await
}

pub async fn harness_with(settings: SecuritySettings) -> Harness {
    init_tracing();
    let mailer = MemoryEmailSender::new();
    let warden = WardenBuilder::new()
        .with_memory_storage()
        .with_jwt_config(
            JwtConfig::new_hs256(b"integration-test-secret-with-32-bytes".to_vec())
                .with_issuer("warden-tests"),
        )
        .with_security_settings(settings)
        .with_mailer(Arc::new(mailer.clone()))
        .build()
        .await
        .expect("Failed to build Warden");
    Harness { warden, mailer }
}

pub async fn create_user(warden: &Warden<MemoryRepositoryProvider>, username: &str) -> User {
    create_user_in(warden.repositories().user(), username).await
}

pub async fn create_user_in(users: &impl UserRepository, username: &str) -> User {
    let user = User::builder()
        .username(username)
        .email(format!("{username}@example.com"))
        .email_confirmed(true)
        .build()
        .expect("Failed to build user");
    users.create(user).await.expect("Failed to create user")
}

pub fn request(identifier: &str) -> LoginRequest {
    LoginRequest::new(identifier, "198.51.100.10")
        .with_user_agent("Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0")
        .with_location("Lisbon, Lisbon, Portugal")
}

pub fn check_password(password: &'static str) -> impl FnOnce(&User) -> bool {
    move |_user| password == PASSWORD
}

/// Log in and expect a session without a second factor.
pub async fn login_ok(
    warden: &Warden<MemoryRepositoryProvider>,
    identifier: &str,
) -> warden::AuthenticatedSession {
    match warden
        .login(request(identifier), check_password(PASSWORD))
        .await
        .expect("Login failed")
    {
        LoginOutcome::Authenticated(session) => *session,
        LoginOutcome::MfaRequired { .. } => panic!("Unexpected MFA challenge"),
    }
}

pub fn totp_code(secret: &str) -> String {
    TotpGenerator::new(TotpConfig::default())
        .current_code(secret)
        .expect("Failed to generate TOTP code")
}

/// Enroll the user in TOTP and return the secret and the first backup codes.
pub async fn enroll_mfa(
    warden: &Warden<MemoryRepositoryProvider>,
    user: &User,
) -> (String, Vec<String>) {
    let enrollment = warden.mfa().setup_totp(&user.id).await.unwrap();
    let (_, batch) = warden
        .mfa()
        .enable_mfa(
            &user.id,
            &totp_code(&enrollment.secret),
            &request(&user.username).client(),
        )
        .await
        .unwrap();
    (enrollment.secret, batch.codes)
}
