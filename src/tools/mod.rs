//! 工具层：会话协议、进程内注册表、行动执行器与内置文档工具

pub mod documents;
pub mod executor;
pub mod registry;
pub mod result;
pub mod session;

pub use documents::{ListDocumentsTool, SearchDocumentsTool};
pub use executor::ActionExecutor;
pub use registry::{Tool, ToolRegistry};
pub use result::{text_reports_empty, ToolOutput, ToolResult};
pub use session::{describe_catalog, ToolContent, ToolDescriptor, ToolResponse, ToolSession};
