use chorely_core::auth::AuthSession;

use crate::auth::{auth_client_for_profile, clear_stored_session, load_stored_session};
use crate::cli::AuthCommands;
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    match command {
        AuthCommands::Login {
            profile,
            email,
            password,
        } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            let profile_config = config.profile(&profile_name).ok_or_else(|| {
                CliError::Config(format!(
                    "Profile '{profile_name}' is not configured. Run `chorely config init --profile {profile_name}` first."
                ))
            })?;
            let client = auth_client_for_profile(&profile_name, profile_config)?.ok_or_else(|| {
                CliError::Config(format!(
                    "Profile '{profile_name}' missing Supabase auth config. Set SUPABASE_URL and SUPABASE_ANON_KEY via `chorely config init`."
                ))
            })?;
            let session = client.sign_in(&email, &password).await?;
            println!(
                "Signed in profile '{profile_name}' as {}",
                session_label(&session)
            );
            Ok(())
        }
        AuthCommands::Status { profile } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            let Some(profile_config) = config.profile(&profile_name) else {
                println!("Profile '{profile_name}' is not configured.");
                return Ok(());
            };

            let session = match auth_client_for_profile(&profile_name, profile_config)? {
                Some(client) => client.restore_session().await?,
                None => load_stored_session(&profile_name)?,
            };

            if let Some(session) = session {
                println!(
                    "Profile '{}' is signed in as {} (expires_at={})",
                    profile_name,
                    session_label(&session),
                    session.expires_at
                );
            } else {
                println!("Profile '{profile_name}' is not signed in.");
            }
            Ok(())
        }
        AuthCommands::Logout { profile } => {
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            let stored_session = load_stored_session(&profile_name)?;
            let client = match config.profile(&profile_name) {
                Some(profile_config) => auth_client_for_profile(&profile_name, profile_config)?,
                None => None,
            };

            if let (Some(client), Some(session)) = (client, stored_session) {
                client.sign_out(&session.access_token).await?;
            } else {
                clear_stored_session(&profile_name)?;
            }

            println!("Signed out profile '{profile_name}'");
            Ok(())
        }
    }
}

fn session_label(session: &AuthSession) -> &str {
    session.user.email.as_deref().unwrap_or("(no email)")
}
