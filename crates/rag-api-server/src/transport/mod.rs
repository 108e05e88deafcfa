pub mod widget;

pub use widget::WidgetHub;
