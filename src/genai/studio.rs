use std::{sync::Arc, time::Duration};

use tracing::{error, info, instrument};

use super::{
    client::{GenerativeModel, InlineImage, Part, IMAGE_MODEL, TEXT_MODEL},
    notify, prompts,
    retry::{with_timeout_and_retry, RetryPolicy},
    GenAiError, StatusSink, StepStatus,
};

pub const VARIANTS_PER_DERIVATION: usize = 4;
pub const FALLBACK_DESCRIPTION: &str = "A creative image.";

#[derive(Debug, Clone)]
pub struct ModelNames {
    pub image: String,
    pub text: String,
}

impl Default for ModelNames {
    fn default() -> Self {
        Self {
            image: IMAGE_MODEL.to_string(),
            text: TEXT_MODEL.to_string(),
        }
    }
}

/// One model call made by a workflow, with the prompt text sent to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPrompt {
    pub workflow: &'static str,
    pub step: &'static str,
    pub model: String,
    pub prompt: String,
}

impl ModelNames {
    /// Every prompt the workflows send, in call order. The derivation
    /// variant prompt is shown as a template at the default creativity.
    pub fn prompt_catalog(&self) -> Vec<WorkflowPrompt> {
        let entry = |workflow, step, model: &String, prompt: String| WorkflowPrompt {
            workflow,
            step,
            model: model.clone(),
            prompt,
        };
        vec![
            entry("derivation", "describe", &self.text, prompts::DESCRIBE.to_string()),
            entry(
                "derivation",
                "variant",
                &self.image,
                prompts::derivation_generate("{description}", 5, None),
            ),
            entry("avatar", "render", &self.image, prompts::AVATAR.to_string()),
            entry("try_on", "render", &self.image, prompts::TRY_ON.to_string()),
            entry("swap", "render", &self.image, prompts::SWAP.to_string()),
        ]
    }
}

/// Output of [`Studio::derive`]. `images` holds only the variants that
/// succeeded, so it may be shorter than [`VARIANTS_PER_DERIVATION`].
#[derive(Debug, Clone)]
pub struct Derivation {
    pub images: Vec<InlineImage>,
    pub description: String,
}

/// The four generation workflows over one [`GenerativeModel`].
///
/// Every external call goes through [`with_timeout_and_retry`], and calls
/// inside a workflow are issued strictly one after another.
#[derive(Clone)]
pub struct Studio {
    model: Arc<dyn GenerativeModel>,
    names: ModelNames,
    describe_policy: RetryPolicy,
    image_policy: RetryPolicy,
}

impl Studio {
    pub fn new(model: Arc<dyn GenerativeModel>, names: ModelNames) -> Self {
        Self {
            model,
            names,
            describe_policy: RetryPolicy::new(Duration::from_secs(60), 2),
            image_policy: RetryPolicy::new(Duration::from_secs(60), 1),
        }
    }

    pub fn with_policies(mut self, describe: RetryPolicy, image: RetryPolicy) -> Self {
        self.describe_policy = describe;
        self.image_policy = image;
        self
    }

    /// Describes `image`, then renders [`VARIANTS_PER_DERIVATION`] variants
    /// from that description. A failed describe step fails the derivation;
    /// failed variants are skipped.
    #[instrument(skip(self, image, sink), fields(mime = %image.mime_type))]
    pub async fn derive(
        &self,
        image: &InlineImage,
        intensity: u8,
        skin_tone: Option<&str>,
        sink: Option<&StatusSink>,
    ) -> Result<Derivation, GenAiError> {
        if !(1..=10).contains(&intensity) {
            return Err(GenAiError::InvalidInput(format!(
                "creativity must be between 1 and 10, got {intensity}"
            )));
        }

        notify(sink, StepStatus::AnalyzingImage);
        let description = self.describe(image, sink).await?;

        notify(sink, StepStatus::GeneratingVariations);
        let prompt = prompts::derivation_generate(&description, intensity, skin_tone);

        let mut images = Vec::with_capacity(VARIANTS_PER_DERIVATION);
        for n in 0..VARIANTS_PER_DERIVATION {
            match self
                .generate_image(vec![Part::text(prompt.clone())], "No image generated", sink)
                .await
            {
                Ok(img) => images.push(img),
                Err(e) => error!(variant = n, error = %e, "derivation variant failed"),
            }
        }
        info!(produced = images.len(), "derivation finished");

        Ok(Derivation {
            images,
            description,
        })
    }

    pub async fn avatar(
        &self,
        references: &[InlineImage],
        sink: Option<&StatusSink>,
    ) -> Result<InlineImage, GenAiError> {
        if references.is_empty() {
            return Err(GenAiError::InvalidInput(
                "at least one reference image is required".into(),
            ));
        }
        let mut parts: Vec<Part> = references.iter().cloned().map(Part::Image).collect();
        parts.push(Part::text(prompts::AVATAR));
        self.generate_image(parts, "Failed to generate avatar preview", sink)
            .await
    }

    pub async fn try_on(
        &self,
        person: &InlineImage,
        garment: &InlineImage,
        sink: Option<&StatusSink>,
    ) -> Result<InlineImage, GenAiError> {
        let parts = vec![
            Part::Image(person.clone()),
            Part::Image(garment.clone()),
            Part::text(prompts::TRY_ON),
        ];
        self.generate_image(parts, "Failed to generate try-on image", sink)
            .await
    }

    pub async fn swap(
        &self,
        person: &InlineImage,
        scene: &InlineImage,
        sink: Option<&StatusSink>,
    ) -> Result<InlineImage, GenAiError> {
        let parts = vec![
            Part::Image(person.clone()),
            Part::Image(scene.clone()),
            Part::text(prompts::SWAP),
        ];
        self.generate_image(parts, "Failed to generate swap image", sink)
            .await
    }

    async fn describe(&self, image: &InlineImage, sink: Option<&StatusSink>) -> Result<String, GenAiError> {
        let parts = vec![Part::Image(image.clone()), Part::text(prompts::DESCRIBE)];
        let text = with_timeout_and_retry(&self.describe_policy, sink, || {
            let model = self.model.clone();
            let name = self.names.text.clone();
            let parts = parts.clone();
            async move {
                let out = model.generate_content(&name, parts).await?;
                Ok(collect_text(out))
            }
        })
        .await?;

        if text.trim().is_empty() {
            Ok(FALLBACK_DESCRIPTION.to_string())
        } else {
            Ok(text)
        }
    }

    // A response without an image counts as a failed attempt.
    async fn generate_image(
        &self,
        parts: Vec<Part>,
        missing: &'static str,
        sink: Option<&StatusSink>,
    ) -> Result<InlineImage, GenAiError> {
        with_timeout_and_retry(&self.image_policy, sink, || {
            let model = self.model.clone();
            let name = self.names.image.clone();
            let parts = parts.clone();
            async move {
                let out = model.generate_content(&name, parts).await?;
                first_image(out).ok_or(GenAiError::NoImage(missing))
            }
        })
        .await
    }
}

fn collect_text(parts: Vec<Part>) -> String {
    parts
        .into_iter()
        .filter_map(|p| match p {
            Part::Text(t) => Some(t),
            Part::Image(_) => None,
        })
        .collect()
}

fn first_image(parts: Vec<Part>) -> Option<InlineImage> {
    parts.into_iter().find_map(|p| match p {
        Part::Image(img) => Some(img),
        Part::Text(_) => None,
    })
}
