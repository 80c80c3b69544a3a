//! Version bookkeeping shared by the artifact stores.

use chrono::{DateTime, Utc};

use crate::domain::{ArtifactKind, ArtifactRef, VideoId, content_digest};

/// Outcome of writing content over the current reference of a kind.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Placement {
    /// Same digest as the current reference; nothing to write.
    Unchanged(ArtifactRef),
    Replace {
        new: ArtifactRef,
        superseded: Option<ArtifactRef>,
    },
}

pub(crate) fn place(
    current: Option<&ArtifactRef>,
    video_id: &VideoId,
    kind: ArtifactKind,
    content: &[u8],
    produced_at: DateTime<Utc>,
) -> Placement {
    let digest = content_digest(content);
    match current {
        Some(current) if current.digest == digest => Placement::Unchanged(current.clone()),
        _ => Placement::Replace {
            new: ArtifactRef {
                video_id: video_id.clone(),
                kind,
                digest,
                size: content.len() as u64,
                version: current.map_or(1, |c| c.version + 1),
                produced_at,
            },
            superseded: current.cloned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_keeps_the_reference() {
        let id = VideoId::new("BV1");
        let now = Utc::now();
        let Placement::Replace { new, superseded } =
            place(None, &id, ArtifactKind::Summary, b"a", now)
        else {
            panic!("first write must replace");
        };
        assert_eq!(new.version, 1);
        assert!(superseded.is_none());

        assert_eq!(
            place(Some(&new), &id, ArtifactKind::Summary, b"a", now),
            Placement::Unchanged(new.clone())
        );

        match place(Some(&new), &id, ArtifactKind::Summary, b"b", now) {
            Placement::Replace { new: next, superseded } => {
                assert_eq!(next.version, 2);
                assert_eq!(superseded, Some(new));
            }
            other => panic!("expected replace, got {other:?}"),
        }
    }
}
