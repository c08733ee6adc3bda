//! Choosing image files for a writer.

use crate::{
    doctree::Doctree, environment::BuildEnvironment, error::BuildError, logger::WarningSink,
};
use std::collections::BTreeMap;

/// Pick one candidate per image node and point the node at its copy.
///
/// `imgpath` is the image directory as seen from the document's output.
/// Returns source path → output file name for every image that has to be
/// copied. Images without a usable candidate are warned about and left
/// unresolved.
pub fn post_process_images(
    tree: &mut Doctree,
    writer_name: &str,
    supported: &[&str],
    imgpath: &str,
    env: &BuildEnvironment,
    warnings: &WarningSink,
) -> Result<BTreeMap<String, String>, BuildError> {
    let docname = tree.docname.clone();
    let mut selected = BTreeMap::new();

    for image in tree.images_mut() {
        if let Some(remote) = image.candidates.get("?") {
            image.resolved = Some(remote.clone());
            continue;
        }

        let candidate = match image.candidates.get("*") {
            Some(path) => path.clone(),
            None => {
                let chosen = supported
                    .iter()
                    .find_map(|mimetype| image.candidates.get(*mimetype));
                match chosen {
                    Some(path) => path.clone(),
                    None => {
                        let message = if image.candidates.is_empty() {
                            format!(
                                "a suitable image for {writer_name} builder not found: {}",
                                image.uri
                            )
                        } else {
                            let mimetypes: Vec<&String> = image.candidates.keys().collect();
                            format!(
                                "a suitable image for {writer_name} builder not found: {mimetypes:?} ({})",
                                image.uri
                            )
                        };
                        warnings.warn_at(&docname, Some(image.line), message)?;
                        continue;
                    }
                }
            }
        };

        // unreadable files were warned about while reading
        let Some(entry) = env.images.get(&candidate) else {
            continue;
        };
        image.resolved = Some(format!("{imgpath}/{}", entry.filename));
        selected.insert(candidate, entry.filename.clone());
    }

    Ok(selected)
}
