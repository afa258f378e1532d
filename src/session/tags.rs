use crate::transcript::Message;

/// Opaque classification label.
pub type Tag = String;

/// Classifies a transcript into an ordered set of tags.
///
/// The directory calls this once per session and stores the result
/// verbatim.
pub trait Tagger: Send + Sync {
    fn generate_tags(&self, messages: &[Message]) -> Vec<Tag>;
}

/// Tagger that attaches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTags;

impl Tagger for NoTags {
    fn generate_tags(&self, _messages: &[Message]) -> Vec<Tag> {
        Vec::new()
    }
}

impl<F> Tagger for F
where
    F: Fn(&[Message]) -> Vec<Tag> + Send + Sync,
{
    fn generate_tags(&self, messages: &[Message]) -> Vec<Tag> {
        self(messages)
    }
}
