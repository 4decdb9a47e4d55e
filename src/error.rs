/// Failures that end the triggering operation and are shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoticeError {
    #[error("Failed to search. Please try again. ({0})")]
    SearchFailure(String),

    #[error("No preview available for this item")]
    NoPreviewAvailable,

    #[error("Could not play the preview. It may be restricted in your region. ({0})")]
    PlaybackRejected(String),
}

impl NoticeError {
    pub fn search(err: &anyhow::Error) -> Self {
        Self::SearchFailure(format!("{err:#}"))
    }

    pub fn rejected(err: &anyhow::Error) -> Self {
        Self::PlaybackRejected(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_keep_the_underlying_cause() {
        let err = anyhow::anyhow!("connection refused").context("catalog request failed");
        let notice = NoticeError::search(&err);
        assert_eq!(
            notice.to_string(),
            "Failed to search. Please try again. (catalog request failed: connection refused)"
        );
    }
}
