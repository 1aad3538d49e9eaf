pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod signals;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{
    ActivityRepository, ConversationStore, CreatedNegotiation, EmailConfigRepository,
    InstructionsRepository, MessageRepository, NegotiationRepository, PairCommit,
    PairRepository, PairTransition, ProductRepository, RepositoryError, SqlCatalogRepository,
    SqlConversationStore, SqlEmailConfigRepository, SummaryRepository, SupplierRepository,
};
pub use signals::ReplySignals;
