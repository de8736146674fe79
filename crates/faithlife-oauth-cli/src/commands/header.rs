//! Header command - prints a signed Authorization header.

use anyhow::{Result, bail};
use clap::Args;
use faithlife_oauth::{SignatureMethod, SignedRequest, build_header};

use super::Context;

/// Arguments for the header command.
#[derive(Args, Debug)]
pub struct HeaderArgs {
    /// Signature method (PLAINTEXT or HMAC-SHA1)
    #[arg(long, default_value = "PLAINTEXT")]
    pub method: SignatureMethod,

    /// HTTP method of the request being signed
    #[arg(long, default_value = "GET")]
    pub http_method: String,

    /// Request URL (required for HMAC-SHA1)
    #[arg(long)]
    pub url: Option<String>,

    /// Access or temporary token
    #[arg(long)]
    pub oauth_token: Option<String>,

    /// Secret matching --oauth-token
    #[arg(long)]
    pub token_secret: Option<String>,

    /// Verifier returned by the provider
    #[arg(long)]
    pub verifier: Option<String>,

    /// Callback URL
    #[arg(long)]
    pub callback: Option<String>,

    /// Extra signed parameter as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

/// Run the header command.
pub async fn run(args: HeaderArgs, ctx: &Context) -> Result<()> {
    if args.method == SignatureMethod::HmacSha1 && args.url.is_none() {
        bail!("--url is required for HMAC-SHA1 signatures");
    }
    if let Err(e) = ctx.identity.validate() {
        tracing::warn!("{}", e);
    }

    let request = SignedRequest {
        http_method: args.http_method,
        url: args.url.unwrap_or_default(),
        signature_method: args.method,
        token_secret: args.token_secret,
        callback: args.callback,
        verifier: args.verifier,
        token: args.oauth_token,
        params: args.params,
    };

    println!("{}", build_header(&ctx.identity, &request));
    Ok(())
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}
