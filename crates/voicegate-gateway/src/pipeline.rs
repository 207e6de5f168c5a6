//! One recognition unit: utterance in, zero, one, or two audio replies out.
//!
//! transcribe → analyze → notify backend → speak the acknowledgement →
//! await the follow-up event → speak it. Any collaborator failure ends the
//! unit; nothing propagates past it.

use tracing::{debug, info, warn};

use voicegate_core::error::Result;
use voicegate_core::types::SessionContext;
use voicegate_media::Utterance;
use voicegate_providers::{BackendRequest, Services};

use crate::delivery::DeliveryHandle;

/// Run a unit to completion, logging instead of returning failures.
pub async fn run_unit(
    services: Services,
    ctx: SessionContext,
    utterance: Utterance,
    delivery: DeliveryHandle,
) {
    let frames = utterance.frames();
    if let Err(e) = process(&services, &ctx, utterance, &delivery).await {
        warn!(
            session_id = %ctx.session_id,
            frames,
            kind = e.kind(),
            service = ?e.service(),
            error = %e,
            "recognition unit aborted"
        );
    }
}

async fn process(
    services: &Services,
    ctx: &SessionContext,
    utterance: Utterance,
    delivery: &DeliveryHandle,
) -> Result<()> {
    let text = services
        .transcriber
        .transcribe(utterance.samples(), utterance.sample_rate())
        .await?;
    if text.trim().is_empty() {
        debug!(session_id = %ctx.session_id, "empty transcript, skipping");
        return Ok(());
    }
    info!(session_id = %ctx.session_id, text = %text, "transcribed");

    let analysis = services.analyzer.analyze(&text).await?;
    info!(session_id = %ctx.session_id, result = %analysis.text, "analyzed");

    let ack = services
        .backend
        .notify(&BackendRequest {
            summoner_id: ctx.summoner_id.clone(),
            final_text: analysis.text,
            region: ctx.region.clone(),
        })
        .await?;

    speak(services, ctx, delivery, &ack.spell_check_message).await;

    let params = ack.event_params(&ctx.summoner_id);
    match services
        .backend
        .await_event(&params, services.event_timeout)
        .await?
    {
        Some(event) => {
            info!(session_id = %ctx.session_id, message = %event.spell_cool_down_message, "backend event");
            speak(services, ctx, delivery, &event.spell_cool_down_message).await;
        }
        None => debug!(session_id = %ctx.session_id, "no backend event"),
    }
    Ok(())
}

/// Synthesize and queue a reply. Synthesis failures only cost this reply.
async fn speak(services: &Services, ctx: &SessionContext, delivery: &DeliveryHandle, text: &str) {
    match services.synthesizer.synthesize(text).await {
        Ok(Some(audio)) => {
            delivery.push(audio);
        }
        Ok(None) => debug!(session_id = %ctx.session_id, "synthesizer returned no audio"),
        Err(e) => warn!(session_id = %ctx.session_id, error = %e, "speech synthesis failed"),
    }
}
