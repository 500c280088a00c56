//! Sound effects in two phases: one LLM job per sound derives a prompt, then
//! the audio batch runs and every clip is saved as `<type>.wav`.

use super::GenerationContext;
use crate::batch::BatchReport;
use crate::error::ForgeError;
use crate::job::{Job, JobKind};
use crate::provider::{LlmRequest, SoundType};
use serde::Serialize;
use tracing::{info, warn};

/// Reports of both phases.
#[derive(Debug, Clone, Serialize)]
pub struct SoundReport {
    pub prompts: BatchReport,
    pub audio: BatchReport,
}

/// Derive a prompt per sound (falling back to `"<type> sound effect"`), then
/// generate and save every clip.
pub async fn generate_sounds(
    ctx: &GenerationContext,
    description: &str,
    sounds: &[SoundType],
) -> Result<SoundReport, ForgeError> {
    let llm = ctx.providers.llm()?;
    let audio = ctx.providers.audio()?;
    let system = ctx.prompts.render("sound_system", &[])?;

    let mut prompt_jobs = Vec::with_capacity(sounds.len());
    for sound in sounds {
        let prompt = ctx.prompts.render(
            "sound_prompt",
            &[("description", description), ("sound_type", sound.as_str())],
        )?;
        prompt_jobs.push(Job::new(
            JobKind::Text,
            sound.as_str(),
            llm.job(LlmRequest::text(system.clone(), prompt)),
        ));
    }
    let prompts = ctx.runner.run_batch(prompt_jobs).await?;

    let audio_jobs: Vec<Job> = sounds
        .iter()
        .zip(&prompts.results)
        .map(|(sound, result)| {
            let prompt = match result.payload().and_then(|p| p.as_text()) {
                Some(text) if !text.is_empty() => text.to_string(),
                _ => {
                    warn!(sound = %sound, "Prompt derivation failed, using fallback");
                    sound.fallback_prompt()
                }
            };
            Job::new(
                JobKind::Audio,
                sound.as_str().to_ascii_lowercase(),
                audio.job(prompt, sound.clone()),
            )
        })
        .collect();
    let report = ctx.runner.run_and_persist(audio_jobs, &ctx.assets).await?;

    info!(
        sounds = sounds.len(),
        saved = report.persisted.len(),
        failed = report.failure_count,
        "Sound generation finished"
    );
    Ok(SoundReport {
        prompts,
        audio: report,
    })
}
