//! Static dataset catalog.
//!
//! This is the only place that maps public dataset ids to warehouse tables, and so
//! the allow-list of tables reachable through the API. Every dataset endpoint
//! resolves through it.

use crate::{
    error::AppError,
    models::dataset::{DatasetDescriptor, DatasetType, DisplayMetadata},
};

static DATASETS: &[DatasetDescriptor] = &[
    DatasetDescriptor {
        id: "ecom-datamart",
        dataset_type: DatasetType::Datamart,
        main_table: "ecom_customers",
        related_tables: &[
            "ecom_customers",
            "ecom_orders",
            "ecom_order_items",
            "ecom_products",
        ],
        display: DisplayMetadata {
            name: "E-commerce Datamart",
            description: "Customers, orders, order lines and the product catalog of an online store",
            category: "E-commerce",
            tags: &["joins", "aggregation", "retail"],
        },
    },
    DatasetDescriptor {
        id: "hr-datamart",
        dataset_type: DatasetType::Datamart,
        main_table: "hr_employees",
        related_tables: &["hr_employees", "hr_departments", "hr_salaries"],
        display: DisplayMetadata {
            name: "HR Datamart",
            description: "Employees, departments and salary history of a mid-sized company",
            category: "Human Resources",
            tags: &["joins", "window-functions"],
        },
    },
    DatasetDescriptor {
        id: "sales-transactions",
        dataset_type: DatasetType::Table,
        main_table: "sales_transactions",
        related_tables: &["sales_transactions"],
        display: DisplayMetadata {
            name: "Sales Transactions",
            description: "Point-of-sale transactions across regions and store formats",
            category: "Sales",
            tags: &["aggregation", "time-series"],
        },
    },
    DatasetDescriptor {
        id: "web-traffic",
        dataset_type: DatasetType::Table,
        main_table: "web_traffic_sessions",
        related_tables: &["web_traffic_sessions"],
        display: DisplayMetadata {
            name: "Web Traffic Sessions",
            description: "Website sessions with source, device and conversion outcome",
            category: "Marketing",
            tags: &["funnels", "filtering"],
        },
    },
    DatasetDescriptor {
        id: "customer-churn",
        dataset_type: DatasetType::Table,
        main_table: "customer_churn",
        related_tables: &["customer_churn"],
        display: DisplayMetadata {
            name: "Customer Churn",
            description: "Subscription customers with tenure, plan and churn flag",
            category: "Analytics",
            tags: &["classification", "case-when"],
        },
    },
];

/// All datasets in catalog order.
pub fn all() -> &'static [DatasetDescriptor] {
    DATASETS
}

/// Look a dataset up by its public id.
pub fn resolve(dataset_id: &str) -> Option<&'static DatasetDescriptor> {
    DATASETS.iter().find(|dataset| dataset.id == dataset_id)
}

/// Resolve or fail with a 404.
pub fn require(dataset_id: &str) -> Result<&'static DatasetDescriptor, AppError> {
    resolve(dataset_id).ok_or_else(|| AppError::NotFound(format!("Dataset '{dataset_id}' not found")))
}

/// Pick the working table of a request.
///
/// No table means the main table. A named table must be one of the dataset's
/// related tables, for downloads and queries alike.
pub fn table_for(
    dataset: &'static DatasetDescriptor,
    requested: Option<&str>,
) -> Result<&'static str, AppError> {
    match requested.map(str::trim).filter(|t| !t.is_empty()) {
        None => Ok(dataset.main_table),
        Some(table) => dataset
            .related_tables
            .iter()
            .copied()
            .find(|candidate| *candidate == table)
            .ok_or_else(|| AppError::UnknownTable {
                table: table.to_string(),
                available: dataset.related_tables.to_vec(),
            }),
    }
}
