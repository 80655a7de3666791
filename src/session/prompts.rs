//! Prompt text for internal requests and canned transcript errors.

/// Asks the model to name the conversation in a few words.
pub const TOPIC_PROMPT: &str =
    "Summarize the conversation in a title of four to five words, \
     with no punctuation and no quotation marks";

/// Asks the model to compress prior history into a rolling memory prompt.
pub const SUMMARIZE_PROMPT: &str =
    "Summarize the discussion briefly in 50 words or less to use as a prompt \
     for future context.";

/// Shown in place of a reply when credentials are rejected.
pub const UNAUTHORIZED_ERROR: &str =
    "Unauthorized access. Please enter a valid access code in the settings page.";

/// Appended to a partial reply when the stream fails.
pub const STREAM_ERROR: &str = "Something went wrong. Please try again later.";
