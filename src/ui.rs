use iocraft::prelude::*;

use strato::ScriptMetadata;

#[derive(Default, Props)]
pub struct ScriptListProps {
    pub scripts: Vec<ScriptMetadata>,
}

#[component]
pub fn ScriptList(props: &ScriptListProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            #(props.scripts.iter().map(|script| {
                let size = script
                    .size
                    .map(|size| format!("{size} B"))
                    .unwrap_or_else(|| "-".to_owned());
                let details = format!("  {}  {}", size, script.modified_on);
                element! {
                    View(flex_direction: FlexDirection::Row) {
                        Text(weight: Weight::Bold, content: script.id.clone())
                        Text(content: details)
                    }
                }
            }))
        }
    }
}

#[derive(Default, Props)]
pub struct SuccessMessageProps {
    pub message: String,
}

#[component]
pub fn SuccessMessage(props: &SuccessMessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Green, content: "◆ ")
            Text(content: props.message.clone())
        }
    }
}

#[derive(Default, Props)]
pub struct ErrorMessageProps {
    pub message: String,
}

#[component]
pub fn ErrorMessage(props: &ErrorMessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(color: Color::Red, content: "▲ ")
            Text(content: props.message.clone())
        }
    }
}
