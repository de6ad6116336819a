use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

const MODULE_JOURNAL: &str = "journal";

/// Runtime configuration for the journal analysis module, seeded into the
/// database on first boot and loaded once at startup. Deployments can tune
/// prompts or swap models by editing the `module_configs` row.
#[derive(Clone, Debug)]
pub struct JournalSettings {
    pub models: JournalModels,
    pub prompts: JournalPrompts,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalModels {
    pub summary_model: String,
    pub score_model: String,
}

impl Default for JournalModels {
    fn default() -> Self {
        default_journal_models()
    }
}

/// System prompts for the four generation requests issued per submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalPrompts {
    pub one_line: String,
    pub four_sentence: String,
    pub narrative: String,
    pub contentment: String,
}

impl Default for JournalPrompts {
    fn default() -> Self {
        default_journal_prompts()
    }
}

impl JournalSettings {
    pub async fn ensure_defaults(pool: &PgPool) -> Result<()> {
        let models = serde_json::to_value(default_journal_models())?;
        let prompts = serde_json::to_value(default_journal_prompts())?;

        sqlx::query(
            "INSERT INTO module_configs (module_name, models, prompts) VALUES ($1, $2, $3)
             ON CONFLICT (module_name) DO NOTHING",
        )
        .bind(MODULE_JOURNAL)
        .bind(&models)
        .bind(&prompts)
        .execute(pool)
        .await
        .context("failed to seed default journal settings")?;

        Ok(())
    }

    pub async fn load(pool: &PgPool) -> Result<Self> {
        let row = sqlx::query_as::<_, ModuleConfigRow>(
            "SELECT models, prompts FROM module_configs WHERE module_name = $1",
        )
        .bind(MODULE_JOURNAL)
        .fetch_optional(pool)
        .await
        .context("failed to load journal configuration from database")?
        .ok_or_else(|| anyhow!("journal module configuration is missing"))?;

        let models: JournalModels = serde_json::from_value(row.models)
            .map_err(|err| anyhow!("failed to parse journal models: {err}"))?;
        let prompts: JournalPrompts = serde_json::from_value(row.prompts)
            .map_err(|err| anyhow!("failed to parse journal prompts: {err}"))?;

        Ok(Self { models, prompts })
    }
}

#[derive(sqlx::FromRow)]
struct ModuleConfigRow {
    models: Value,
    prompts: Value,
}

fn default_journal_models() -> JournalModels {
    JournalModels {
        summary_model: "gpt-4o-mini".to_string(),
        score_model: "gpt-4o-mini".to_string(),
    }
}

fn default_journal_prompts() -> JournalPrompts {
    JournalPrompts {
        one_line: "You are a supportive and insightful journaling assistant who helps people reflect on their day with empathy and wisdom. Read the user's journal entries and respond with a single sentence of at most 15 words that captures the essence of their day. Respond with that sentence only, no preamble.".to_string(),
        four_sentence: "You are a supportive and insightful journaling assistant who helps people reflect on their day with empathy and wisdom. Read the user's journal entries and respond with exactly four sentences: the first summarising the day's main themes, the second reflecting how they seemed to feel, the third offering warm encouragement, and the fourth a forward-looking note for tomorrow. Respond with those four sentences only.".to_string(),
        narrative: "You are a compassionate journaling assistant. A user has completed their daily journal with the entries below.\n\nPlease provide:\n1. A brief, warm summary of their entries (2-3 sentences)\n2. Thoughtful insights about patterns or themes you notice\n3. Encouraging feedback and suggestions for growth\n4. A positive note to end on\n5. Steps for tomorrow based on the entries\n\nIf an answer is nonsensical or just a single word, point that out briefly and skip feedback for it. Keep your response personal, supportive, and concise (200-300 words).".to_string(),
        contentment: "You are rating how content a person was with their day based on their journal entries. Use this scale: 0-2 distressed or very unhappy, 3-4 struggling, 5-6 neutral or mixed, 7-8 content, 9-10 very happy. Respond with only the digit(s) of the score, nothing else.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_survive_json_round_trip() {
        let models = serde_json::to_value(default_journal_models()).expect("serialize models");
        let prompts = serde_json::to_value(default_journal_prompts()).expect("serialize prompts");

        let models: JournalModels = serde_json::from_value(models).expect("parse models");
        let prompts: JournalPrompts = serde_json::from_value(prompts).expect("parse prompts");

        assert_eq!(models.summary_model, "gpt-4o-mini");
        assert!(prompts.one_line.contains("15 words"));
        assert!(prompts.four_sentence.contains("exactly four sentences"));
        assert!(prompts.narrative.contains("200-300 words"));
        assert!(prompts.contentment.contains("only the digit"));
    }
}
