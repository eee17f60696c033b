mod entry;

use dirtysoap_coord::error::AppResult;

fn main() -> AppResult<()> {
    entry::run()
}
