use restyle_contracts::compatibility::CompatibilityReport;

pub const SUBJECT_LABEL: &str =
    "SUBJECT PORTRAIT (immutable base, preserve everything except clothing):";
pub const SOURCE_LABEL: &str =
    "SOURCE INSPIRATION (clothing reference to transfer onto the subject):";

pub const CLOTHING_ANALYSIS_INSTRUCTION: &str = "Analyze this image and identify all clothing items present. For each clothing item, provide:
1. Type of clothing (shirt, pants, dress, jacket, etc.)
2. Color and pattern description
3. Style and fit (casual, formal, loose, tight, etc.)
4. Material appearance (cotton, denim, silk, etc.)
5. Any distinctive features or details

Return the analysis in JSON format with an array of clothing items.";

pub const BODY_POSE_INSTRUCTION: &str = "Analyze this image to detect the person's body pose and measurements. Provide:
1. Body position and orientation (front, side, back, angle)
2. Pose description (standing, sitting, arms position, etc.)
3. Estimated body proportions
4. Key body landmarks and their relative positions

Return the analysis in JSON format.";

/// Instruction text for a clothing transfer onto a subject of the given size.
pub fn transfer_prompt(
    subject_width: u32,
    subject_height: u32,
    style_hint: Option<&str>,
    compatibility: &CompatibilityReport,
) -> String {
    let aspect = if subject_height == 0 {
        0.0
    } else {
        f64::from(subject_width) / f64::from(subject_height)
    };

    let mut prompt = format!(
        "You are an expert image generation system performing a clothing style transfer. \
You receive two images: a Subject Portrait and a Source Inspiration. Produce one output image \
that reproduces the Subject Portrait exactly, except for the clothing worn by the person.

The Subject Portrait is the immutable base. The output must keep its exact dimensions \
({subject_width}×{subject_height} pixels, aspect ratio {aspect:.4}), orientation and framing. \
The Source Inspiration's size, orientation and composition do not influence the output; \
use it only as a clothing reference.

Do not crop, pad, reframe or re-render anything other than the clothing. Face, expression, \
skin, hair, pose, body proportions, hands, accessories, background, lighting and camera angle \
must stay identical to the Subject Portrait.

From the Source Inspiration, take only the garments: type, fabric, texture, pattern, colour, \
cut, fit, layering and details. Fit them to the subject's exact pose and body shape with \
natural folds, draping and shadows that follow the Subject Portrait's lighting. Where parts of \
the outfit are hidden in the source, continue the garment style coherently.

The result is the Subject Portrait with only the clothing replaced.
"
    );

    if let Some(hint) = style_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        prompt.push_str("\nAdditional styling instructions from the user:\n");
        prompt.push_str(hint);
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(&compatibility.prompt_section());
    prompt
}
