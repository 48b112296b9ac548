use std::path::Path;

use chorely_core::models::Reward;
use chorely_core::util::normalize_text_option;
use chorely_core::{EntityKind, Record};
use serde::Serialize;

use crate::cli::RewardCommands;
use crate::commands::common::{normalize_title, open_service, resolve_record, short_id};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RewardListItem {
    pub id: String,
    pub title: String,
    pub cost: i64,
    pub updated_at: i64,
}

pub async fn run_reward(command: RewardCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        RewardCommands::Add { title, cost } => {
            let reward = Reward::new(normalize_title(&title)?, cost);
            let saved = open_service(db_path)?.save(reward).await?;
            println!("Created reward {}", short_id(saved.id()));
            Ok(())
        }
        RewardCommands::List { json } => run_reward_list(json, db_path).await,
    }
}

async fn run_reward_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let rewards = open_service(db_path)?
        .list(EntityKind::Reward)
        .await?
        .into_iter()
        .filter_map(|record| match record {
            Record::Reward(reward) => Some(reward),
            _ => None,
        })
        .collect::<Vec<_>>();

    if as_json {
        let items = rewards
            .iter()
            .map(|reward| RewardListItem {
                id: reward.id.clone(),
                title: reward.title.clone(),
                cost: reward.cost,
                updated_at: reward.updated_at,
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if rewards.is_empty() {
        println!("No rewards yet.");
        return Ok(());
    }

    for reward in &rewards {
        println!(
            "{:<13}  {:<40}  {:>5} pts",
            short_id(&reward.id),
            reward.title,
            reward.cost
        );
    }
    Ok(())
}

pub async fn run_redeem(
    reward_query: &str,
    profile_id: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path)?;
    let reward = resolve_record(&service, EntityKind::Reward, reward_query).await?;
    let redemption = service
        .redeem(reward.id(), normalize_text_option(profile_id))
        .await?;
    println!(
        "Redeemed reward {} for {} points",
        short_id(reward.id()),
        redemption.cost
    );
    Ok(())
}
