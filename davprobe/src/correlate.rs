use crate::channel::ChannelMessage;

/// Decide whether any `fileChange` entry in the log refers to `target_path`.
///
/// Both paths are normalized by stripping a single leading separator, then a
/// notification matches if any of four predicates holds: exact equality, the
/// target occurring inside the observed path, the observed path ending with
/// the target, or the target ending with the observed path. Servers report
/// change paths relative to different roots, with or without a leading
/// separator, or nested under a deployment-specific prefix, so this stays
/// deliberately permissive and accepts the occasional false positive on a
/// shared suffix.
pub fn notification_matches(target_path: &str, log: &[ChannelMessage]) -> bool {
    let target = normalize(target_path);
    log.iter().any(|message| match message {
        ChannelMessage::FileChange { path } => {
            let observed = normalize(path);
            target == observed
                || observed.contains(target)
                || observed.ends_with(target)
                || target.ends_with(observed)
        }
        _ => false,
    })
}

fn normalize(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}
