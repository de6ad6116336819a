use std::collections::BTreeMap;

use anyhow::{Context, Result as AnyResult};
use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    config::JournalSettings,
    llm::{ChatMessage, LlmRequest, MessageRole},
    users,
    web::{
        AppState,
        auth::AuthClaims,
        error::{AppError, Result},
    },
};

pub const DEFAULT_HISTORY_LIMIT: i64 = 30;
const MAX_HISTORY_LIMIT: i64 = 365;

const DEFAULT_CONTENTMENT_SCORE: i64 = 5;
const MIN_CONTENTMENT_SCORE: i64 = 0;
const MAX_CONTENTMENT_SCORE: i64 = 10;

const ONE_LINE_MAX_TOKENS: u32 = 60;
const FOUR_SENTENCE_MAX_TOKENS: u32 = 160;
const NARRATIVE_MAX_TOKENS: u32 = 500;
const SCORE_MAX_TOKENS: u32 = 10;
const PROSE_TEMPERATURE: f64 = 0.7;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/journal/analyze", post(analyze_entry))
        .route("/api/journal/entries", get(recent_entries))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    #[serde(default)]
    answers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    entry_date: Option<String>,
}

#[derive(Serialize)]
struct AnalyzeResponse {
    summary: String,
}

async fn analyze_entry(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>> {
    let answers = request.answers.unwrap_or_default();
    if answers.is_empty() {
        return Err(AppError::Validation("Answers are required".to_string()));
    }

    let transcript = build_transcript(&answers).ok_or_else(|| {
        AppError::Validation("At least one answer must contain text".to_string())
    })?;
    let entry_date = resolve_entry_date(request.entry_date.as_deref())?;

    let user = users::resolve_user(state.pool_ref(), &claims).await?;

    let generated = generate_summaries(&state, &transcript).await.map_err(|err| {
        error!(?err, user_id = %user.id, "summary generation failed");
        AppError::Generation(err.to_string())
    })?;

    let entry_id = store_entry(state.pool_ref(), user.id, entry_date, &answers, &generated).await?;

    info!(
        user_id = %user.id,
        %entry_id,
        %entry_date,
        contentment_score = generated.contentment_score,
        "journal entry analyzed and stored"
    );

    Ok(Json(AnalyzeResponse {
        summary: generated.narrative,
    }))
}

#[derive(Deserialize)]
struct EntriesQuery {
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Serialize)]
struct EntriesResponse {
    entries: Vec<EntryListItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryListItem {
    id: Uuid,
    date: String,
    one_line_summary: Option<String>,
    contentment_score: Option<i32>,
}

async fn recent_entries(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<EntriesResponse>> {
    let limit = clamp_history_limit(query.limit);
    let user = users::resolve_user(state.pool_ref(), &claims).await?;

    let rows = sqlx::query_as::<_, EntryRow>(
        "SELECT id, entry_date, one_line_summary, contentment_score
         FROM journal_entries
         WHERE user_id = $1
         ORDER BY entry_date DESC
         LIMIT $2",
    )
    .bind(user.id)
    .bind(limit)
    .fetch_all(state.pool_ref())
    .await?;

    let entries = rows
        .into_iter()
        .map(|row| EntryListItem {
            id: row.id,
            date: row.entry_date.to_string(),
            one_line_summary: row.one_line_summary,
            contentment_score: row.contentment_score,
        })
        .collect();

    Ok(Json(EntriesResponse { entries }))
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    entry_date: NaiveDate,
    one_line_summary: Option<String>,
    contentment_score: Option<i32>,
}

/// The aggregate of the four generation requests for one submission.
#[derive(Debug, Clone)]
pub struct GeneratedSummaries {
    pub one_line: String,
    pub four_sentence: String,
    pub narrative: String,
    pub contentment_score: i32,
}

/// Issue the four generation requests concurrently and join on all of them.
///
/// Any failed request fails the whole aggregation; there is no
/// partial-result fallback. The one exception is the contentment score,
/// whose *response text* may be unusable: that degrades to a neutral default
/// instead of discarding the other three summaries.
async fn generate_summaries(state: &AppState, transcript: &str) -> AnyResult<GeneratedSummaries> {
    let settings = state.journal_settings();
    let llm = state.llm_client();

    let one_line_request = prose_request(settings, &settings.prompts.one_line, transcript)
        .with_max_tokens(ONE_LINE_MAX_TOKENS);
    let four_sentence_request = prose_request(settings, &settings.prompts.four_sentence, transcript)
        .with_max_tokens(FOUR_SENTENCE_MAX_TOKENS);
    let narrative_request = prose_request(settings, &settings.prompts.narrative, transcript)
        .with_max_tokens(NARRATIVE_MAX_TOKENS);
    let score_request = LlmRequest::new(
        settings.models.score_model.clone(),
        vec![
            ChatMessage::new(MessageRole::System, settings.prompts.contentment.clone()),
            ChatMessage::new(MessageRole::User, transcript),
        ],
    )
    .with_temperature(0.0)
    .with_max_tokens(SCORE_MAX_TOKENS);

    let (one_line, four_sentence, narrative, score) = tokio::try_join!(
        llm.execute(one_line_request),
        llm.execute(four_sentence_request),
        llm.execute(narrative_request),
        llm.execute(score_request),
    )
    .context("generative service request failed")?;

    Ok(GeneratedSummaries {
        one_line: one_line.text.trim().to_string(),
        four_sentence: four_sentence.text.trim().to_string(),
        narrative: narrative.text.trim().to_string(),
        contentment_score: parse_contentment_score(&score.text),
    })
}

fn prose_request(settings: &JournalSettings, prompt: &str, transcript: &str) -> LlmRequest {
    LlmRequest::new(
        settings.models.summary_model.clone(),
        vec![
            ChatMessage::new(MessageRole::System, prompt),
            ChatMessage::new(MessageRole::User, transcript),
        ],
    )
    .with_temperature(PROSE_TEMPERATURE)
}

/// Atomically insert or fully replace the entry for (user, date).
///
/// A prior row for the same date is overwritten field by field, including a
/// refreshed creation timestamp; this must stay a single conditional write
/// so concurrent submissions for the same date cannot interleave.
async fn store_entry(
    pool: &PgPool,
    user_id: Uuid,
    entry_date: NaiveDate,
    answers: &BTreeMap<String, String>,
    generated: &GeneratedSummaries,
) -> Result<Uuid> {
    let answers_json = serde_json::to_value(answers)
        .map_err(|err| AppError::Internal(anyhow::anyhow!("failed to encode answers: {err}")))?;

    let entry_id: Uuid = sqlx::query_scalar(
        "INSERT INTO journal_entries
             (user_id, entry_date, answers, one_line_summary, four_sentence_summary, contentment_score)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (user_id, entry_date) DO UPDATE SET
             answers = EXCLUDED.answers,
             one_line_summary = EXCLUDED.one_line_summary,
             four_sentence_summary = EXCLUDED.four_sentence_summary,
             contentment_score = EXCLUDED.contentment_score,
             created_at = NOW()
         RETURNING id",
    )
    .bind(user_id)
    .bind(entry_date)
    .bind(answers_json)
    .bind(&generated.one_line)
    .bind(&generated.four_sentence)
    .bind(generated.contentment_score)
    .fetch_one(pool)
    .await?;

    Ok(entry_id)
}

/// Build the transcript fed to the generative service.
///
/// Blank answers are skipped entirely; returns `None` when nothing remains.
fn build_transcript(answers: &BTreeMap<String, String>) -> Option<String> {
    let lines: Vec<String> = answers
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(id, value)| format!("{}: {}", display_label(id), value.trim()))
        .collect();

    if lines.is_empty() {
        return None;
    }

    Some(lines.join("\n"))
}

/// Derive a display label from a question identifier: case boundaries become
/// word breaks and the leading letter is capitalized.
fn display_label(identifier: &str) -> String {
    let mut words = String::with_capacity(identifier.len() + 4);

    for (idx, ch) in identifier.chars().enumerate() {
        if ch.is_uppercase() && idx > 0 {
            words.push(' ');
        }
        words.extend(ch.to_lowercase());
    }

    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => words,
    }
}

/// Parse the score response, degrading to a neutral default and clamping to
/// the rubric range whatever the service returned.
fn parse_contentment_score(raw: &str) -> i32 {
    let trimmed = raw.trim();

    let parsed = trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| first_integer(trimmed))
        .unwrap_or(DEFAULT_CONTENTMENT_SCORE);

    parsed.clamp(MIN_CONTENTMENT_SCORE, MAX_CONTENTMENT_SCORE) as i32
}

fn first_integer(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect();

    digits.parse().ok()
}

fn resolve_entry_date(raw: Option<&str>) -> Result<NaiveDate> {
    match raw {
        None => Ok(Local::now().date_naive()),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
            AppError::Validation("entryDate must be formatted as YYYY-MM-DD".to_string())
        }),
    }
}

fn clamp_history_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn labels_split_on_case_boundaries() {
        assert_eq!(display_label("mood"), "Mood");
        assert_eq!(display_label("gratitude"), "Gratitude");
        assert_eq!(display_label("tomorrowFocus"), "Tomorrow focus");
        assert_eq!(display_label("sleepQualityLastNight"), "Sleep quality last night");
    }

    #[test]
    fn transcript_skips_blank_answers() {
        let answers = answers(&[
            ("mood", "tired but okay"),
            ("gratitude", "   "),
            ("tomorrow", "rest"),
        ]);

        let transcript = build_transcript(&answers).expect("non-empty transcript");
        assert_eq!(transcript, "Mood: tired but okay\nTomorrow: rest");
    }

    #[test]
    fn transcript_is_none_when_every_answer_is_blank() {
        let answers = answers(&[("mood", ""), ("gratitude", "  \n ")]);
        assert!(build_transcript(&answers).is_none());
    }

    #[test]
    fn transcript_trims_answer_text() {
        let answers = answers(&[("mood", "  great!  ")]);
        assert_eq!(build_transcript(&answers).unwrap(), "Mood: great!");
    }

    #[test]
    fn score_parses_plain_integers() {
        assert_eq!(parse_contentment_score("7"), 7);
        assert_eq!(parse_contentment_score(" 10 \n"), 10);
        assert_eq!(parse_contentment_score("0"), 0);
    }

    #[test]
    fn score_falls_back_to_neutral_on_garbage() {
        assert_eq!(parse_contentment_score("pretty good day"), 5);
        assert_eq!(parse_contentment_score(""), 5);
    }

    #[test]
    fn score_accepts_embedded_digits() {
        assert_eq!(parse_contentment_score("8/10"), 8);
        assert_eq!(parse_contentment_score("Score: 6"), 6);
    }

    #[test]
    fn score_clamps_out_of_rubric_values() {
        assert_eq!(parse_contentment_score("15"), 10);
        assert_eq!(parse_contentment_score("-3"), 0);
        assert_eq!(parse_contentment_score("11"), 10);
    }

    #[test]
    fn entry_date_defaults_to_today() {
        let today = Local::now().date_naive();
        assert_eq!(resolve_entry_date(None).unwrap(), today);
    }

    #[test]
    fn entry_date_parses_iso_dates_and_rejects_garbage() {
        assert_eq!(
            resolve_entry_date(Some("2024-01-15")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert!(resolve_entry_date(Some("15/01/2024")).is_err());
        assert!(resolve_entry_date(Some("not-a-date")).is_err());
    }

    #[test]
    fn history_limit_clamps_to_bounds() {
        assert_eq!(clamp_history_limit(None), DEFAULT_HISTORY_LIMIT);
        assert_eq!(clamp_history_limit(Some(10)), 10);
        assert_eq!(clamp_history_limit(Some(0)), 1);
        assert_eq!(clamp_history_limit(Some(-5)), 1);
        assert_eq!(clamp_history_limit(Some(100_000)), 365);
    }
}
