//! Dispatch a decoded job to the generator, per job type.

use rand::Rng;

use render_common::job::{GenerationRequest, Job, JobType};

use crate::consumer::ConsumerContext;
use crate::error::ConsumeError;
use crate::generator::GeneratorExecution;
use crate::moderate;

pub async fn dispatch(
    context: &ConsumerContext,
    job: &Job,
) -> Result<Vec<GeneratorExecution>, ConsumeError> {
    match job.job_type {
        JobType::TextToImage => text_to_image(context, job).await,
        JobType::TextToPortrait => text_to_portrait(context, job).await,
    }
}

/// General text-to-image: NSFW is governed by the submitting team.
async fn text_to_image(
    context: &ConsumerContext,
    job: &Job,
) -> Result<Vec<GeneratorExecution>, ConsumeError> {
    job.request_data.validate()?;

    let nsfw_allowed = match &job.team {
        Some(team) => match context.repo.is_team_nsfw_allowed(team).await {
            Ok(allowed) => allowed,
            Err(error) => {
                // Fail closed when the lookup is unavailable.
                tracing::warn!(
                    job_id = %job.id,
                    %error,
                    "team NSFW lookup failed, defaulting to disabled"
                );
                false
            }
        },
        None => false,
    };
    moderate::sanitize_prompt(
        context.moderator.as_ref(),
        &job.request_data.prompt,
        nsfw_allowed,
    )
    .await?;

    run_generator(context, &job.request_data).await
}

/// Portraits never allow NSFW, regardless of the team's settings.
async fn text_to_portrait(
    context: &ConsumerContext,
    job: &Job,
) -> Result<Vec<GeneratorExecution>, ConsumeError> {
    job.request_data.validate()?;
    moderate::sanitize_prompt(context.moderator.as_ref(), &job.request_data.prompt, false).await?;

    run_generator(context, &job.request_data).await
}

/// Invoke the generator once per requested option. A fixed request seed is
/// honored; otherwise each iteration draws a fresh random seed.
async fn run_generator(
    context: &ConsumerContext,
    request: &GenerationRequest,
) -> Result<Vec<GeneratorExecution>, ConsumeError> {
    // The backend can only load weights that were cached at startup.
    for plugin in &request.plugins {
        if context.plugins.path(&plugin.id).is_none() {
            return Err(ConsumeError::MissingPlugin(plugin.id.clone()));
        }
    }

    let mut executions = Vec::with_capacity(request.num_options as usize);
    for _ in 0..request.num_options {
        let mut attempt = request.clone();
        attempt.seed = Some(request.seed.unwrap_or_else(random_seed));
        executions.push(context.generator.text_to_image(&attempt).await?);
    }
    Ok(executions)
}

fn random_seed() -> i64 {
    i64::from(rand::thread_rng().gen::<u32>())
}
