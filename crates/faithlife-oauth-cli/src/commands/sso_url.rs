//! SSO URL command - prints a script-tag credential lookup URL.

use anyhow::Result;
use clap::Args;
use faithlife_oauth::AuthorizationFlow;

use super::Context;

/// Arguments for the sso-url command.
#[derive(Args, Debug)]
pub struct SsoUrlArgs {
    /// Name of the JavaScript function the response will invoke
    pub method_name: String,
}

/// Run the sso-url command.
pub async fn run(args: SsoUrlArgs, ctx: &Context) -> Result<()> {
    let flow = AuthorizationFlow::new(ctx.identity.clone());
    println!("{}", flow.sso_credential_lookup_url(&args.method_name));
    Ok(())
}
