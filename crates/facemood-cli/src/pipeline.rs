use crate::image_ref::image_ref;
use crate::recorder::{Recorded, RecorderError, RecorderHandle};
use facemood_core::observe::detect;
use facemood_core::{FaceAnalyzer, NamePrompt, Observation, ObserveError, Outcome};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Observe(#[from] ObserveError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error("cannot reference image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Observes images concurrently, funnelling every store access through the
/// recorder thread.
///
/// Unknown faces are named one at a time. Before each prompt the face is
/// resolved again, so a person enrolled by another task while this one was
/// waiting is recognized instead of being asked for twice.
#[derive(Clone)]
pub struct Pipeline<A> {
    recorder: RecorderHandle,
    analyzer: A,
    prompt: Arc<Mutex<Box<dyn NamePrompt + Send>>>,
    prompt_turn: Arc<tokio::sync::Mutex<()>>,
    embed: bool,
}

impl<A> Pipeline<A>
where
    A: FaceAnalyzer + Clone + Send + 'static,
{
    pub fn new(
        recorder: RecorderHandle,
        analyzer: A,
        prompt: Box<dyn NamePrompt + Send>,
        embed: bool,
    ) -> Self {
        Self {
            recorder,
            analyzer,
            prompt: Arc::new(Mutex::new(prompt)),
            prompt_turn: Arc::new(tokio::sync::Mutex::new(())),
            embed,
        }
    }

    pub async fn observe(
        &self,
        image: PathBuf,
    ) -> Result<(Outcome, Option<Recorded>), PipelineError> {
        let image_str = image.display().to_string();

        let mut analyzer = self.analyzer.clone();
        let embed = self.embed;
        let (sighting, reference) = {
            let image_str = image_str.clone();
            tokio::task::spawn_blocking(move || {
                let sighting = detect(&mut analyzer, &image_str)?;
                let reference = image_ref(&image, embed)
                    .map_err(|source| PipelineError::Image { path: image, source })?;
                Ok::<_, PipelineError>((sighting, reference))
            })
            .await??
        };
        let mood = sighting.mood;
        let observation = Observation::now(reference, mood);

        if let Some((name, distance)) = self.recorder.resolve(sighting.descriptor.clone()).await? {
            let recorded = self
                .recorder
                .record(name.clone(), None, observation, false)
                .await?;
            return Ok((Outcome::Recognized { name, mood, distance }, Some(recorded)));
        }

        let _turn = self.prompt_turn.lock().await;

        if let Some((name, distance)) = self.recorder.resolve(sighting.descriptor.clone()).await? {
            tracing::info!(person = %name, image = %image_str, "enrolled while waiting to prompt");
            let recorded = self
                .recorder
                .record(name.clone(), None, observation, false)
                .await?;
            return Ok((Outcome::Recognized { name, mood, distance }, Some(recorded)));
        }

        let prompt = Arc::clone(&self.prompt);
        let asked_for = image_str.clone();
        let name = tokio::task::spawn_blocking(move || {
            prompt
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .ask_name(&asked_for)
        })
        .await?
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

        let Some(name) = name else {
            tracing::info!(image = %image_str, "unknown face left unnamed; observation skipped");
            return Ok((Outcome::Skipped { mood }, None));
        };

        let recorded = self
            .recorder
            .record(name.clone(), Some(sighting.descriptor), observation, true)
            .await?;
        Ok((Outcome::Enrolled { name, mood }, Some(recorded)))
    }
}
