// EditorPlugin: base class for user editor plugins (see
// `tether_runtime::register_editor_plugin`).

use tether_runtime::{EngineClass, HasParent};

use crate::node::Node;

pub struct EditorPlugin;

impl EngineClass for EditorPlugin {
    const CLASS_NAME: &'static str = "EditorPlugin";
}

impl HasParent for EditorPlugin {
    type Parent = Node;
}
