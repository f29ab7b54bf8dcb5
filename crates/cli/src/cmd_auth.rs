//! `benchdash login` / `benchdash logout`

use anyhow::{Context as _, Result};

use crate::Context;

pub fn login(ctx: &mut Context, token: String) -> Result<()> {
    let token = token.trim().to_string();
    anyhow::ensure!(!token.is_empty(), "token must not be empty");

    ctx.session.set_token(Some(token));
    ctx.session.save().context("Failed to save session")?;

    println!();
    println!(
        "  Token saved to {}",
        ctx.data_dir.session_path().display()
    );
    println!();
    Ok(())
}

pub fn logout(ctx: &mut Context) -> Result<()> {
    let was_authenticated = ctx.session.is_authenticated();
    ctx.session.clear().context("Failed to clear session")?;

    println!();
    if was_authenticated {
        println!("  Logged out.");
    } else {
        println!("  No saved token.");
    }
    println!();
    Ok(())
}
