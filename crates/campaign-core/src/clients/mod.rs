//! Client modules for external collaborators

pub mod completion;
pub mod data_source;
pub mod tool_gateway;

pub use completion::{CompletionService, OpenAiCompletionClient};
pub use data_source::{CampaignDataSource, HttpCampaignSource, StaticCampaignSource};
pub use tool_gateway::{HttpToolGateway, ToolGateway, ToolRequest, ToolResponse};
