//! Instruction text sent alongside every captured frame.

/// Asks the model for a good/bad sitting-posture call as a small JSON object.
pub const POSTURE_PROMPT: &str = "Analyze the posture of the person in this image. \
Focus on whether they are sitting upright suitable for working at a computer, \
or if they are slouching, hunching, or leaning too far forward/backward. \
Respond ONLY with JSON containing 'posture': 'good' or 'posture': 'bad'. \
If 'bad', optionally include a brief 'reason'. \
Example good: {\"posture\": \"good\"}. \
Example bad: {\"posture\": \"bad\", \"reason\": \"Slouching forward\"}.";
