use std::rc::Rc;

use crate::post::Post;

/// The posts that land on a single tick: remote posts ordered by ascending
/// broker index, local (predicted) posts in the order they were made.
/// Remote posts replay before local posts within a tick (spec §3).
#[derive(Default)]
pub struct TimelineBucket {
    pub remote: Vec<Rc<Post>>,
    pub local: Vec<Rc<Post>>,
}

impl TimelineBucket {
    pub fn insert_remote(&mut self, post: Rc<Post>) {
        let pos = self.remote.partition_point(|p| p.index < post.index);
        self.remote.insert(pos, post);
    }

    pub fn is_empty(&self) -> bool {
        self.remote.is_empty() && self.local.is_empty()
    }
}
