//! Retrieval engine: time parsing, vector search, hierarchical search,
//! graph expansion and aggregates lookup.

pub mod aggregates;
pub mod graph;
pub mod hierarchical;
pub mod search;
pub mod time;

pub use aggregates::{AggregateItem, AggregatesLookup, AggregatesResult};
pub use graph::{ExpandOptions, GraphExpander, GraphExpansion, RelatedEntity};
pub use hierarchical::{DayMatch, HierarchicalSearchResult, HierarchicalSearcher};
pub use search::{NoteMatch, SearchResult, VectorSearcher};
pub use time::{parse_time_filter, TimeFilter};
