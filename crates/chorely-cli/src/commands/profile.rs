use std::path::Path;

use chorely_core::models::Profile;
use chorely_core::{EntityKind, Record};
use serde::Serialize;

use crate::cli::ProfileCommands;
use crate::commands::common::{normalize_title, open_service, short_id};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ProfileListItem {
    pub id: String,
    pub display_name: String,
}

pub async fn run_profile(command: ProfileCommands, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    match command {
        ProfileCommands::Add { name } => {
            let saved = service.save(Profile::new(normalize_title(&name)?)).await?;
            println!("Created profile {} ({})", short_id(saved.id()), saved.id());
        }
        ProfileCommands::List { json } => {
            let items = service
                .list(EntityKind::Profile)
                .await?
                .into_iter()
                .filter_map(|record| match record {
                    Record::Profile(profile) => Some(ProfileListItem {
                        id: profile.id,
                        display_name: profile.display_name,
                    }),
                    _ => None,
                })
                .collect::<Vec<_>>();

            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("No profiles yet.");
            } else {
                for item in &items {
                    println!("{:<13}  {}", short_id(&item.id), item.display_name);
                }
            }
        }
    }
    Ok(())
}
