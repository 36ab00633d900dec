//! Prompt text sent to the hosted models.

pub const DESCRIBE: &str = "Analyze the provided image and generate a detailed description that captures its key visual elements, including the subject, setting, lighting, color palette, and artistic style. The description should be precise and suitable for recreating the image.";

pub const AVATAR: &str = "Create a high-quality, professional character image based on these reference photos.
The style should be clean, with a gray-white background and studio-level natural lighting.
The character's makeup, facial features, body shape, skin tone, hairstyle, and hair color must be consistent with the original images, without any changes.
The character wears a white tight yoga outfit.
Subject centered. Image ratio 3:4.";

pub const TRY_ON: &str = "Generate a realistic image of the person from the first image wearing the clothing from the second image. Ensure the clothing is exactly consistent with the original, while maintaining natural fit, matching the model's pose, lighting, and body shape. The garment silhouette, fabric, and structure must not be altered. Image ratio 3:4.";

pub const SWAP: &str = "Compose the person from the first image into the scene provided by the second image. Harmonize lighting, shadows, and color tones so that the character appears to naturally belong in the environment. Keep the pose of the person in the second image unchanged, and choose a full-body or suitable composition according to the scene. Image ratio 3:4.";

pub fn derivation_generate(description: &str, intensity: u8, skin_tone: Option<&str>) -> String {
    let mut prompt = format!(
        "Generate a creative variant based on the following description: \"{description}\".\nCreativity level: {intensity}/10.\n"
    );
    if let Some(tone) = skin_tone {
        prompt.push_str(&format!(
            "IMPORTANT: The subject in the image must have a {tone} skin tone. Ensure this skin tone is applied naturally. Keep all other features such as hair style, facial structure, clothing, and pose consistent with the original description, only modifying the skin tone.\n"
        ));
    }
    prompt.push_str("Maintain the style, but explore different artistic interpretations. Use photorealistic photography style. Image ratio 3:4. Return only the image.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_prompt_embeds_description_and_level() {
        let p = derivation_generate("a red fox", 7, None);
        assert!(p.starts_with("Generate a creative variant based on the following description: \"a red fox\"."));
        assert!(p.contains("Creativity level: 7/10."));
        assert!(!p.contains("skin tone"));
        assert!(p.ends_with("Return only the image."));
    }

    #[test]
    fn skin_tone_adds_constraint() {
        let p = derivation_generate("portrait", 3, Some("medium"));
        assert!(p.contains("must have a medium skin tone"));
    }
}
