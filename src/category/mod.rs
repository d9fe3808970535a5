//! Categories for grouping transactions, e.g. "Groceries" or "Salary".

mod db;
mod domain;
mod endpoints;

pub use db::{
    category_belongs_to_user, create_category, create_category_table, delete_category,
    get_categories, get_category, get_category_by_name, update_category,
};
pub use domain::{Category, CategoryId, CategoryName, DEFAULT_COLOR, DEFAULT_ICON, NewCategory};
pub use endpoints::{
    CategoryQuery, CategoryRequest, CategoryState, create_category_endpoint,
    delete_category_endpoint, get_categories_endpoint, update_category_endpoint,
};
