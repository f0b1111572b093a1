use crate::models::{ContainerId, ItemId};

/// Renders the player page. The real template engine is an external
/// collaborator; the gateway only needs something implementing this seam.
pub trait PageRenderer: Send + Sync {
    fn render_watch(&self, container_id: &ContainerId, item_id: &ItemId, hash: &str) -> String;
}

/// Minimal built-in renderer: a bare HTML5 player pointed at the stream
/// route.
#[derive(Debug, Default)]
pub struct BasicPageRenderer;

impl PageRenderer for BasicPageRenderer {
    fn render_watch(&self, container_id: &ContainerId, item_id: &ItemId, hash: &str) -> String {
        let src = format!("/{container_id}/stream?id={item_id}&hash={hash}");
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>tidegate player</title>
<style>body{{margin:0;background:#000}}video{{width:100vw;height:100vh}}</style>
</head>
<body>
<video controls autoplay src="{src}"></video>
</body>
</html>
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_page_embeds_stream_url() {
        let page = BasicPageRenderer.render_watch(
            &ContainerId::from("C"),
            &ItemId::from("17"),
            "ab12cd",
        );
        assert!(page.contains("/C/stream?id=17&hash=ab12cd"));
        assert!(page.contains("<video"));
    }
}
