use serde_json::json;

use crate::cli::utils::{output_error, output_success};
use crate::cli::OutputFormat;
use crate::services::AccountService;

/// Seed a super admin directly, ignoring the public registration switches
pub async fn handle(name: &str, email: &str, password: &str, output_format: OutputFormat) -> anyhow::Result<()> {
    let pool = super::connect().await?;

    match AccountService::new(pool).create_super_admin(name, email, password).await {
        Ok(account) => output_success(
            output_format,
            &format!("Super admin {} created", account.email),
            Some(json!({ "id": account.id, "email": account.email })),
        ),
        Err(e) => {
            output_error(output_format, e.message(), Some(e.error_code()))?;
            Err(anyhow::anyhow!("failed to create super admin"))
        }
    }
}
